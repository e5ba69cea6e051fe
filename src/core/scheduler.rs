//! Scheduler loop, time-slot ticker, and the public scheduler handle.
//!
//! # Design
//!
//! - **Single-consumer loop**: suspending and terminating tasks notify the
//!   loop over one bounded MPSC channel; the loop alone touches the wait
//!   queue, so the queue needs no locking.
//! - **No polling**: the loop blocks on the channel, tasks block on their
//!   capacity-1 wake channels, and the ticker blocks in a `select!`. Dropping
//!   the senders at close unblocks everything naturally.
//! - **Greedy draining**: the loop absorbs every buffered notification before
//!   admitting, so the policy compares as many candidates as possible.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::context::Context;
use crate::core::error::SchedulerError;
use crate::core::policy::TaskSnapshot;
use crate::core::queue::WaitQueue;
use crate::core::task::{CurrentTask, Task};
use crate::util::clock::Clock;

/// Message on the suspend channel.
pub(crate) enum Notice {
    /// A task ran its suspension protocol and is parked on its wake channel.
    Suspended(Weak<Task>),
    /// A task terminated; wakes the loop so a replacement can be admitted.
    Terminated,
}

/// State shared between the scheduler handle, the loop thread, the ticker
/// thread, and every task.
pub(crate) struct Shared {
    policy: Box<dyn Fn(&TaskSnapshot) -> i64 + Send + Sync>,
    concurrency: usize,
    clock: Clock,
    /// Monotonic slot counter `T`, advanced by the ticker.
    time_slot: AtomicU64,
    /// Tasks currently holding a concurrency slot (`R`). May transiently
    /// exceed `concurrency` while a spawn is in flight; the initial admission
    /// pass surrenders the provisional slot before user code runs.
    running: AtomicI64,
    /// Kept in an `Option` so close can drop it and disconnect the loop.
    suspend_tx: Mutex<Option<Sender<Notice>>>,
    closed: AtomicBool,
    running_ns_total: AtomicU64,
    blocking_ns_total: AtomicU64,
    waiting_ns_total: AtomicU64,
    /// Sum of queue depths observed at each successful admission, counting
    /// the admitted task itself.
    load_sum: AtomicU64,
    admissions: AtomicU64,
    next_task_id: AtomicU64,
}

impl Shared {
    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn current_slot(&self) -> u64 {
        self.time_slot.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn priority_of(&self, snap: &TaskSnapshot) -> i64 {
        (self.policy)(snap)
    }

    /// Clone of the suspend sender, or `None` once the scheduler closed.
    pub(crate) fn suspend_sender(&self) -> Option<Sender<Notice>> {
        self.suspend_tx.lock().clone()
    }

    /// Unconditionally take a slot: spawns (provisional, surrendered during
    /// the initial admission) and close races that hand a slot back.
    pub(crate) fn acquire_slot(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_slot(&self) {
        let prev = self.running.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "running count underflow");
    }

    /// Take a slot only below the cap. CAS loop so concurrent admit paths
    /// cannot overshoot.
    fn try_admit_slot(&self) -> bool {
        let cap = self.concurrency as i64;
        let mut current = self.running.load(Ordering::Acquire);
        loop {
            if current >= cap {
                return false;
            }
            match self.running.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
    }

    pub(crate) fn merge_totals(&self, running_ns: u64, blocking_ns: u64, waiting_ns: u64) {
        self.running_ns_total.fetch_add(running_ns, Ordering::Relaxed);
        self.blocking_ns_total
            .fetch_add(blocking_ns, Ordering::Relaxed);
        self.waiting_ns_total.fetch_add(waiting_ns, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        let (tx, _rx) = bounded(8);
        Arc::new(Self {
            policy: Box::new(crate::core::policy::fifo),
            concurrency: 1,
            clock: Clock::new(),
            time_slot: AtomicU64::new(0),
            running: AtomicI64::new(0),
            suspend_tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            running_ns_total: AtomicU64::new(0),
            blocking_ns_total: AtomicU64::new(0),
            waiting_ns_total: AtomicU64::new(0),
            load_sum: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            next_task_id: AtomicU64::new(0),
        })
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Cumulative running time over all terminated tasks.
    pub running_time: Duration,
    /// Cumulative queue-blocked time over all terminated tasks.
    pub blocking_time: Duration,
    /// Cumulative `wait`-closure time over all terminated tasks.
    pub waiting_time: Duration,
    /// Mean queue depth observed per successful admission.
    pub avg_load: f64,
    /// Number of successful admissions.
    pub admissions: u64,
    /// Tasks currently holding a concurrency slot.
    pub active_tasks: i64,
}

/// Cooperative task scheduler with a pluggable admission policy.
///
/// Tasks spawned through the scheduler run on their own threads but only
/// `concurrency` of them are allowed to run at once; the rest park at
/// cooperation points ([`yield_now`](crate::yield_now) /
/// [`wait`](crate::wait)) until the policy picks them again.
pub struct Scheduler {
    shared: Arc<Shared>,
    ticker_stop: Mutex<Option<Sender<()>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    ticker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration and the given
    /// concurrency cap. `0` resolves to one less than the available hardware
    /// parallelism (minimum 1), reserving a unit for the scheduler itself.
    pub fn new(
        concurrency: usize,
        policy: impl Fn(&TaskSnapshot) -> i64 + Send + Sync + 'static,
    ) -> Self {
        let config = SchedulerConfig::new().with_concurrency(concurrency);
        Self::with_config(config, policy).expect("default configuration is valid")
    }

    /// Create a scheduler from an explicit configuration.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when validation fails.
    pub fn with_config(
        config: SchedulerConfig,
        policy: impl Fn(&TaskSnapshot) -> i64 + Send + Sync + 'static,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let concurrency = config.resolved_concurrency();
        let (suspend_tx, suspend_rx) = bounded(config.resolved_queue_depth());
        let (stop_tx, stop_rx) = bounded(0);

        let shared = Arc::new(Shared {
            policy: Box::new(policy),
            concurrency,
            clock: Clock::new(),
            time_slot: AtomicU64::new(0),
            running: AtomicI64::new(0),
            suspend_tx: Mutex::new(Some(suspend_tx)),
            closed: AtomicBool::new(false),
            running_ns_total: AtomicU64::new(0),
            blocking_ns_total: AtomicU64::new(0),
            waiting_ns_total: AtomicU64::new(0),
            load_sum: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            next_task_id: AtomicU64::new(1),
        });

        let loop_handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("sched-loop".into())
                .spawn(move || run_loop(&shared, &suspend_rx))
                .expect("failed to spawn scheduler loop thread")
        };

        let ticker_handle = {
            let shared = Arc::clone(&shared);
            let period = config.tick();
            thread::Builder::new()
                .name("sched-ticker".into())
                .spawn(move || run_ticker(&shared, &stop_rx, period))
                .expect("failed to spawn ticker thread")
        };

        info!(
            concurrency,
            tick_ms = config.tick_ms,
            "scheduler started"
        );

        Ok(Self {
            shared,
            ticker_stop: Mutex::new(Some(stop_tx)),
            loop_handle: Mutex::new(Some(loop_handle)),
            ticker_handle: Mutex::new(Some(ticker_handle)),
        })
    }

    /// Start `body` as a managed task on its own thread.
    ///
    /// Returns immediately; the task goes through an initial admission pass
    /// before `body` runs, so spawning can never push the number of running
    /// tasks over the cap. The child context carries the task handle for
    /// [`yield_now`](crate::yield_now) and [`wait`](crate::wait).
    pub fn spawn<F>(&self, ctx: &Context, body: F) -> JoinHandle<()>
    where
        F: FnOnce(Context) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);

        // Provisional slot; the initial admission pass gives it back before
        // any user code runs.
        shared.acquire_slot();
        let task = Task::new(shared, id);
        let child = ctx.with_value(CurrentTask(Arc::clone(&task)));

        thread::Builder::new()
            .name(format!("sched-task-{id}"))
            .spawn(move || {
                // Final accounting must run even if the body panics.
                let _guard = CompletionGuard {
                    task: Arc::clone(&task),
                };
                debug!(task_id = id, "task thread started");
                match task.admit_first() {
                    Ok(()) => body(child),
                    Err(_) => debug!(task_id = id, "task never admitted, scheduler closed"),
                }
            })
            .expect("failed to spawn task thread")
    }

    /// Stop the scheduler's background threads.
    ///
    /// Tasks still parked in the queue are woken so their threads can observe
    /// the closed scheduler and finish; in-flight tasks are not cancelled.
    /// Subsequent `yield_now`/`wait` calls fail with
    /// [`SchedulerError::Closed`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] when the scheduler was already closed.
    pub fn close(&self) -> Result<(), SchedulerError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::Closed);
        }

        // One extra slot tick so a preempted task cannot ride the fast path
        // past the closed check.
        self.shared.time_slot.fetch_add(1, Ordering::Release);

        *self.shared.suspend_tx.lock() = None;
        *self.ticker_stop.lock() = None;

        if let Some(handle) = self.loop_handle.lock().take() {
            if handle.join().is_err() {
                warn!("scheduler loop thread panicked");
            }
        }
        if let Some(handle) = self.ticker_handle.lock().take() {
            if handle.join().is_err() {
                warn!("ticker thread panicked");
            }
        }

        info!("scheduler closed");
        Ok(())
    }

    /// Configured concurrency cap.
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Cumulative running time over all terminated tasks.
    pub fn running_time(&self) -> Duration {
        Duration::from_nanos(self.shared.running_ns_total.load(Ordering::Relaxed))
    }

    /// Cumulative queue-blocked time over all terminated tasks.
    pub fn blocking_time(&self) -> Duration {
        Duration::from_nanos(self.shared.blocking_ns_total.load(Ordering::Relaxed))
    }

    /// Cumulative `wait`-closure time over all terminated tasks.
    pub fn waiting_time(&self) -> Duration {
        Duration::from_nanos(self.shared.waiting_ns_total.load(Ordering::Relaxed))
    }

    /// Mean queue depth observed per successful admission, counting the
    /// admitted task itself. `0.0` before the first admission.
    pub fn avg_load(&self) -> f64 {
        let admissions = self.shared.admissions.load(Ordering::Relaxed);
        if admissions == 0 {
            return 0.0;
        }
        self.shared.load_sum.load(Ordering::Relaxed) as f64 / admissions as f64
    }

    /// Snapshot of the scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running_time: self.running_time(),
            blocking_time: self.blocking_time(),
            waiting_time: self.waiting_time(),
            avg_load: self.avg_load(),
            admissions: self.shared.admissions.load(Ordering::Relaxed),
            active_tasks: self.shared.running.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Signal closure if the embedder did not; detach the threads instead
        // of joining so dropping a busy scheduler cannot hang.
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.time_slot.fetch_add(1, Ordering::Release);
            *self.shared.suspend_tx.lock() = None;
            *self.ticker_stop.lock() = None;
            debug!("scheduler dropped without explicit close");
        }
    }
}

struct CompletionGuard {
    task: Arc<Task>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.task.finish();
    }
}

/// The scheduler loop: block for one notification, drain the rest, admit.
fn run_loop(shared: &Shared, suspend_rx: &Receiver<Notice>) {
    let mut queue = WaitQueue::new();

    while let Ok(first) = suspend_rx.recv() {
        absorb(&mut queue, first);
        while let Ok(more) = suspend_rx.try_recv() {
            absorb(&mut queue, more);
        }
        admit(shared, &mut queue);
    }

    // Channel disconnected: the scheduler closed. Wake whatever is still
    // queued so those threads can observe the closure and finish. Each woken
    // task believes it was admitted and will release a slot on termination,
    // so take one on its behalf; the cap no longer matters here.
    let mut woken = 0usize;
    while let Some(task) = queue.get() {
        shared.acquire_slot();
        task.wake();
        woken += 1;
    }
    debug!(woken, "scheduler loop stopped");
}

fn absorb(queue: &mut WaitQueue, notice: Notice) {
    match notice {
        Notice::Suspended(weak) => {
            if let Some(task) = weak.upgrade() {
                queue.put(task.priority(), weak);
            }
        }
        // A terminated task only wakes the loop for replacement admission.
        Notice::Terminated => {}
    }
}

/// Wake queued tasks until the queue is empty or the cap is reached.
fn admit(shared: &Shared, queue: &mut WaitQueue) {
    while !queue.is_empty() {
        if !shared.try_admit_slot() {
            break;
        }
        match queue.get() {
            Some(task) => {
                let depth = queue.len() as u64 + 1;
                shared.load_sum.fetch_add(depth, Ordering::Relaxed);
                shared.admissions.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = task.id, depth, "admitted task");
                task.wake();
            }
            None => {
                // Every remaining entry was dropped; hand the slot back.
                shared.release_slot();
                break;
            }
        }
    }
}

/// Advance the slot counter every `period` until the stop channel disconnects.
fn run_ticker(shared: &Shared, stop_rx: &Receiver<()>, period: Duration) {
    let ticker = tick(period);
    loop {
        select! {
            recv(ticker) -> _ => {
                shared.time_slot.fetch_add(1, Ordering::Release);
            }
            recv(stop_rx) -> _ => break,
        }
    }
    debug!("ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::fifo;

    #[test]
    fn test_close_is_not_idempotent() {
        let sched = Scheduler::new(1, fifo);
        assert!(sched.close().is_ok());
        assert_eq!(sched.close(), Err(SchedulerError::Closed));
    }

    #[test]
    fn test_spawn_and_join() {
        let sched = Scheduler::new(2, fifo);
        let ctx = Context::new();

        let handle = sched.spawn(&ctx, |ctx| {
            for _ in 0..10 {
                crate::core::task::yield_now(&ctx).unwrap();
            }
        });
        handle.join().unwrap();

        let stats = sched.stats();
        assert_eq!(stats.active_tasks, 0);
        assert!(stats.admissions >= 1, "initial admission must be counted");
        assert_eq!(stats.waiting_time, Duration::ZERO);
        sched.close().unwrap();
    }

    #[test]
    fn test_totals_accumulate_on_termination() {
        let sched = Scheduler::new(1, fifo);
        let ctx = Context::new();

        sched
            .spawn(&ctx, |ctx| {
                crate::core::task::wait(&ctx, || {
                    thread::sleep(Duration::from_millis(5));
                })
                .unwrap();
            })
            .join()
            .unwrap();

        assert!(sched.waiting_time() >= Duration::from_millis(4));
        assert!(sched.running_time() > Duration::ZERO);
        sched.close().unwrap();
    }

    #[test]
    fn test_avg_load_counts_admitted_task() {
        let sched = Scheduler::new(1, fifo);
        let ctx = Context::new();

        sched.spawn(&ctx, |_ctx| {}).join().unwrap();

        // A single task admitted from an otherwise empty queue.
        assert!((sched.avg_load() - 1.0).abs() < f64::EPSILON);
        sched.close().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SchedulerConfig::new().with_tick(Duration::ZERO);
        assert!(matches!(
            Scheduler::with_config(config, fifo),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
