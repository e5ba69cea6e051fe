//! Task handle, suspension protocol, and the `yield_now`/`wait` cooperation
//! points.
//!
//! A task suspends on its own thread: it settles its running-time account,
//! gives its concurrency slot back, computes its policy key, hands itself to
//! the scheduler over the suspend channel, and parks on its wake channel until
//! the scheduler admits it again.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::context::Context;
use crate::core::error::SchedulerError;
use crate::core::policy::TaskSnapshot;
use crate::core::scheduler::{Notice, Shared};

/// Per-task state shared between the task's own thread and the scheduler loop.
pub(crate) struct Task {
    shared: Arc<Shared>,
    /// Handed to the scheduler on suspension; the queue never owns the task.
    weak_self: Weak<Task>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    /// Slot counter value at the last admission; 0 until first admitted.
    time_slot: AtomicU64,
    /// Timestamp of the last phase change.
    start_ns: AtomicU64,
    running_ns: AtomicU64,
    blocking_ns: AtomicU64,
    waiting_ns: AtomicU64,
    /// Policy key captured right before the task is enqueued.
    priority: AtomicI64,
    pub(crate) id: u64,
}

impl Task {
    pub(crate) fn new(shared: Arc<Shared>, id: u64) -> Arc<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        let now = shared.clock().now_ns();
        Arc::new_cyclic(|weak| Self {
            shared,
            weak_self: weak.clone(),
            wake_tx,
            wake_rx,
            time_slot: AtomicU64::new(0),
            start_ns: AtomicU64::new(now),
            running_ns: AtomicU64::new(0),
            blocking_ns: AtomicU64::new(0),
            waiting_ns: AtomicU64::new(0),
            priority: AtomicI64::new(0),
            id,
        })
    }

    pub(crate) fn priority(&self) -> i64 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Non-blocking wake. The channel has capacity 1, so a signal already
    /// pending subsumes this one; the parked task consumes it before it can
    /// suspend again.
    pub(crate) fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn account_phase(&self, bucket: &AtomicU64) {
        let now = self.shared.clock().now_ns();
        let start = self.start_ns.swap(now, Ordering::Relaxed);
        bucket.fetch_add(now.saturating_sub(start), Ordering::Relaxed);
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            time_slot: self.time_slot.load(Ordering::Relaxed),
            current_slot: self.shared.current_slot(),
            start_ns: self.start_ns.load(Ordering::Relaxed),
            running_ns: self.running_ns.load(Ordering::Relaxed),
            waiting_ns: self.waiting_ns.load(Ordering::Relaxed),
            blocking_ns: self.blocking_ns.load(Ordering::Relaxed),
        }
    }

    /// Enqueue with the scheduler and park until admitted.
    ///
    /// The caller has already settled its phase account and released its slot.
    /// If the scheduler closed in the meantime the slot is taken back, leaving
    /// the task in the running phase, and `Closed` is returned.
    fn park(&self) -> Result<(), SchedulerError> {
        let key = self.shared.priority_of(&self.snapshot());
        self.priority.store(key, Ordering::Relaxed);

        let Some(tx) = self.shared.suspend_sender() else {
            self.shared.acquire_slot();
            return Err(SchedulerError::Closed);
        };
        if tx.send(Notice::Suspended(self.weak_self.clone())).is_err() {
            self.shared.acquire_slot();
            return Err(SchedulerError::Closed);
        }

        // The wake channel cannot disconnect while we hold both ends; a recv
        // error would mean the task handle itself is gone.
        let _ = self.wake_rx.recv();

        self.time_slot
            .store(self.shared.current_slot(), Ordering::Relaxed);
        self.account_phase(&self.blocking_ns);

        // A wake delivered by the shutdown drain still hands us a slot, but
        // the suspension it resumes reports the closure.
        if self.shared.is_closed() {
            return Err(SchedulerError::Closed);
        }
        Ok(())
    }

    /// Initial admission before the body runs: surrender the provisional slot
    /// taken at spawn and go through the queue like everyone else, with
    /// `time_slot == 0` so policies can recognise a brand-new task.
    pub(crate) fn admit_first(&self) -> Result<(), SchedulerError> {
        self.shared.release_slot();
        self.park()
    }

    /// Final accounting: fold this task's timers into the scheduler totals,
    /// give the slot back, and post the sentinel so a replacement can be
    /// admitted.
    pub(crate) fn finish(&self) {
        self.account_phase(&self.running_ns);
        self.shared.merge_totals(
            self.running_ns.load(Ordering::Relaxed),
            self.blocking_ns.load(Ordering::Relaxed),
            self.waiting_ns.load(Ordering::Relaxed),
        );
        self.shared.release_slot();
        if let Some(tx) = self.shared.suspend_sender() {
            let _ = tx.send(Notice::Terminated);
        }
        debug!(task_id = self.id, "task finished");
    }
}

/// Context slot under which the scheduler stores the current task handle.
pub(crate) struct CurrentTask(pub(crate) Arc<Task>);

fn current_task(ctx: &Context) -> Result<&Task, SchedulerError> {
    ctx.value::<CurrentTask>()
        .map(|slot| slot.0.as_ref())
        .ok_or(SchedulerError::MissingTask)
}

/// Cooperation point: suspend if the task's time slot is up.
///
/// Cheap no-op while the task is still inside the slot of its last admission,
/// so it can be called from tight loops. Once a tick has elapsed the task
/// suspends and waits to be re-admitted under the scheduler's policy.
///
/// # Errors
///
/// [`SchedulerError::Closed`] after the scheduler was closed,
/// [`SchedulerError::MissingTask`] when `ctx` was not handed out by
/// `Scheduler::spawn`.
pub fn yield_now(ctx: &Context) -> Result<(), SchedulerError> {
    let task = current_task(ctx)?;

    if task.time_slot.load(Ordering::Relaxed) >= task.shared.current_slot() {
        return Ok(());
    }
    if task.shared.is_closed() {
        return Err(SchedulerError::Closed);
    }

    task.account_phase(&task.running_ns);
    task.shared.release_slot();
    task.park()
}

/// Run `io` as declared waiting time and suspend afterwards.
///
/// The task gives up its concurrency slot for the whole interval, so I/O does
/// not count against the cap; on return the elapsed time is accounted as
/// waiting, the task re-enters the queue unconditionally, and the closure's
/// result is handed back once the task is re-admitted.
///
/// # Errors
///
/// [`SchedulerError::Closed`] after the scheduler was closed (when the close
/// races the suspension, `io` has already run and its result is discarded),
/// [`SchedulerError::MissingTask`] when `ctx` was not handed out by
/// `Scheduler::spawn`.
pub fn wait<R>(ctx: &Context, io: impl FnOnce() -> R) -> Result<R, SchedulerError> {
    let task = current_task(ctx)?;

    if task.shared.is_closed() {
        return Err(SchedulerError::Closed);
    }

    task.account_phase(&task.running_ns);
    task.shared.release_slot();
    let out = io();
    task.account_phase(&task.waiting_ns);
    task.park()?;
    Ok(out)
}
