//! Monotonic nanosecond clock.

use std::time::Instant;

/// Monotonic clock anchored at its creation instant.
///
/// Task timestamps are plain `u64` nanosecond offsets from the anchor so they
/// can live in atomics. Each scheduler owns one anchor; offsets from different
/// schedulers are not comparable.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor.
    ///
    /// Saturates at `u64::MAX`, which is over five centuries of uptime.
    pub fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic() {
        let clock = Clock::new();
        let a = clock.now_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_ns();
        assert!(b > a);
        assert!(b - a >= 1_000_000);
    }
}
