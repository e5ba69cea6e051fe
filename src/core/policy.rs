//! Scheduling policies: pure functions from a task snapshot to an ordering key.
//!
//! The scheduler admits the task with the *lowest* key first. A policy sees
//! only an immutable [`TaskSnapshot`] taken on the suspending task's own
//! thread, so policies must be pure and cheap; they run once per suspension.
//!
//! Two reference policies ship with the crate: [`fifo`] and [`fairness`].
//! Third-party policies are ordinary `Fn(&TaskSnapshot) -> i64` values passed
//! to `Scheduler::new`.

/// Accounting snapshot of a task at the moment it suspends.
#[derive(Debug, Clone, Copy)]
pub struct TaskSnapshot {
    /// Value of the slot counter when the task was last admitted; `0` means
    /// the task has never been admitted.
    pub time_slot: u64,
    /// Current value of the slot counter.
    pub current_slot: u64,
    /// Timestamp of the task's last phase change, in scheduler-clock
    /// nanoseconds. At snapshot time this is the instant the task suspended.
    pub start_ns: u64,
    /// Cumulative nanoseconds spent running user code.
    pub running_ns: u64,
    /// Cumulative nanoseconds spent inside `wait` closures.
    pub waiting_ns: u64,
    /// Cumulative nanoseconds spent parked in the wait queue.
    pub blocking_ns: u64,
}

/// Bits of the key devoted to the run/wait ratio in [`fairness`].
pub const FACTOR_BITS: u32 = 15;

/// Bits of the key devoted to the admission slot in [`fairness`], the
/// intra-bucket FIFO tie-break.
pub const AGE_BITS: u32 = 48;

const FACTOR_MAX: i64 = (1 << FACTOR_BITS) - 1;
const AGE_MASK: u64 = (1 << AGE_BITS) - 1;
const CPU_BUCKET_WIDTH: i64 = FACTOR_MAX / 8;

/// First-come-first-served: the oldest suspension is admitted first.
///
/// The key is the task's suspension timestamp, so ordering follows the moment
/// each task became blocked. Ties are resolved arbitrarily.
pub fn fifo(snap: &TaskSnapshot) -> i64 {
    i64::try_from(snap.start_ns).unwrap_or(i64::MAX)
}

/// Waiting-biased heuristic, a.k.a. "waitiness": tasks that spend most of
/// their time waiting on I/O are admitted before CPU-heavy ones.
///
/// Key layout, most significant bits first:
///
/// - Tasks that were never admitted get a strictly negative key, ordered among
///   themselves by spawn age, so new arrivals always beat established tasks.
/// - Established tasks pack a 15-bit run/wait factor above a 48-bit admission
///   slot. A lower factor (more waiting) sorts earlier; within a factor bucket
///   the older admission wins.
/// - Factors within one bucket width of the maximum are snapped to it, so
///   CPU-bound tasks form a single bucket ordered purely by age instead of
///   jittering each other on ratio noise.
///
/// A task that only ever waits keeps factor 0 and can starve CPU-bound work;
/// that is the intended bias, not a defect.
pub fn fairness(snap: &TaskSnapshot) -> i64 {
    if snap.time_slot == 0 {
        let age = AGE_MASK - (snap.current_slot & AGE_MASK);
        return -(age as i64);
    }

    let total = snap.running_ns + snap.waiting_ns;
    let mut factor = if total == 0 {
        FACTOR_MAX
    } else {
        (u128::from(snap.running_ns) * FACTOR_MAX as u128 / u128::from(total)) as i64
    };
    factor = factor.clamp(0, FACTOR_MAX);
    if factor >= FACTOR_MAX - CPU_BUCKET_WIDTH {
        factor = FACTOR_MAX;
    }

    (factor << (63 - FACTOR_BITS)) | (snap.time_slot & AGE_MASK) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(time_slot: u64, running_ns: u64, waiting_ns: u64) -> TaskSnapshot {
        TaskSnapshot {
            time_slot,
            current_slot: 100,
            start_ns: 0,
            running_ns,
            waiting_ns,
            blocking_ns: 0,
        }
    }

    #[test]
    fn test_fifo_orders_by_suspension_time() {
        let older = TaskSnapshot {
            start_ns: 1_000,
            ..snap(1, 0, 0)
        };
        let newer = TaskSnapshot {
            start_ns: 2_000,
            ..snap(1, 0, 0)
        };
        assert!(fifo(&older) < fifo(&newer));
    }

    #[test]
    fn test_fairness_new_task_precedes_established() {
        let fresh = snap(0, 0, 0);
        let established = snap(5, 1_000, 1_000_000);
        assert!(fairness(&fresh) < 0);
        assert!(fairness(&fresh) < fairness(&established));
    }

    #[test]
    fn test_fairness_new_tasks_fifo_by_age() {
        let earlier = TaskSnapshot {
            current_slot: 10,
            ..snap(0, 0, 0)
        };
        let later = TaskSnapshot {
            current_slot: 20,
            ..snap(0, 0, 0)
        };
        assert!(fairness(&earlier) < fairness(&later));
    }

    #[test]
    fn test_fairness_prefers_waiting_heavy_tasks() {
        let io_bound = snap(7, 1_000_000, 9_000_000);
        let cpu_bound = snap(3, 9_000_000, 1_000_000);
        assert!(fairness(&io_bound) < fairness(&cpu_bound));
    }

    #[test]
    fn test_fairness_cpu_bucket_orders_by_slot() {
        // Both factors land in the snapped CPU bucket; only the admission
        // slot should decide.
        let older = snap(2, 9_000_000, 1_000);
        let newer = snap(9, 5_000_000, 2_000);
        assert!(fairness(&older) < fairness(&newer));
    }

    #[test]
    fn test_fairness_bucket_snap_is_stable() {
        // Slightly different CPU-heavy ratios collapse to the same factor.
        let a = snap(4, 10_000_000, 1);
        let b = snap(4, 10_000_000, 40_000);
        assert_eq!(fairness(&a), fairness(&b));
    }

    #[test]
    fn test_fairness_pure_waiter_is_top_priority() {
        let waiter = snap(6, 0, 5_000_000);
        let mixed = snap(6, 1, 5_000_000);
        assert!(fairness(&waiter) <= fairness(&mixed));
        // Factor 0 leaves only the slot bits.
        assert_eq!(fairness(&waiter), 6);
    }

    #[test]
    fn test_fairness_key_fits_packing() {
        let worst = snap(AGE_MASK, u64::MAX / 2, 0);
        let key = fairness(&worst);
        assert!(key > 0);
        assert_eq!(key >> (63 - FACTOR_BITS), FACTOR_MAX);
    }
}
