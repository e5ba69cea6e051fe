//! Scheduler tuning knobs.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration.
///
/// All fields have auto-resolving defaults; `SchedulerConfig::default()` is
/// always valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrency cap `P`: how many tasks may run at once. `0` resolves to
    /// one less than the available hardware parallelism (minimum 1),
    /// reserving a unit for the scheduler's own bookkeeping.
    pub concurrency: usize,
    /// Time-slot period in milliseconds. A task is preempted at its next
    /// cooperation point once a slot has elapsed since its admission. Must be
    /// at least 1.
    pub tick_ms: u64,
    /// Suspend-channel capacity. `0` resolves to the effective concurrency.
    /// Any positive depth is correct; the loop's greedy draining absorbs
    /// bursts regardless.
    pub queue_depth: usize,
}

impl SchedulerConfig {
    /// Configuration with all fields at their defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency cap (`0` = auto).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the time-slot period. Sub-millisecond durations truncate to zero
    /// and fail validation.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the suspend-channel capacity (`0` = auto).
    #[must_use]
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable reason when a field is out of range.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_ms == 0 {
            return Err("tick_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// The time-slot period as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// The effective concurrency cap after auto-resolution.
    pub fn resolved_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        let hardware = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(2);
        hardware.saturating_sub(1).max(1)
    }

    /// The effective suspend-channel capacity after auto-resolution.
    pub fn resolved_queue_depth(&self) -> usize {
        if self.queue_depth > 0 {
            self.queue_depth
        } else {
            self.resolved_concurrency()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            tick_ms: 10,
            queue_depth: 0,
        }
    }
}
