//! Priority-ordered wait queue for suspended tasks.
//!
//! The queue is touched only by the scheduler loop thread and is therefore
//! unsynchronised. Entries hold non-owning task handles; the task itself is
//! owned by its spawn closure for its whole lifetime.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};

use super::task::Task;

/// One suspended task with the policy key captured at enqueue time.
struct Entry {
    key: i64,
    task: Weak<Task>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the maximum; reverse so the lowest key surfaces
        // first. Equal keys carry no further guarantee.
        other.key.cmp(&self.key)
    }
}

/// Min-heap of suspended tasks keyed by policy priority.
pub(crate) struct WaitQueue {
    entries: BinaryHeap<Entry>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a task under `key`. O(log n).
    pub(crate) fn put(&mut self, key: i64, task: Weak<Task>) {
        self.entries.push(Entry { key, task });
    }

    /// Remove and return the lowest-key task, skipping entries whose task has
    /// already been dropped. Returns `None` once the queue is empty.
    pub(crate) fn get(&mut self) -> Option<Arc<Task>> {
        while let Some(entry) = self.entries.pop() {
            if let Some(task) = entry.task.upgrade() {
                return Some(task);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::Shared;

    fn task(shared: &Arc<Shared>, id: u64) -> Arc<Task> {
        Task::new(Arc::clone(shared), id)
    }

    #[test]
    fn test_lowest_key_pops_first() {
        let shared = Shared::for_tests();
        let a = task(&shared, 1);
        let b = task(&shared, 2);
        let c = task(&shared, 3);

        let mut q = WaitQueue::new();
        q.put(30, Arc::downgrade(&a));
        q.put(10, Arc::downgrade(&b));
        q.put(20, Arc::downgrade(&c));

        assert_eq!(q.len(), 3);
        assert_eq!(q.get().map(|t| t.id), Some(2));
        assert_eq!(q.get().map(|t| t.id), Some(3));
        assert_eq!(q.get().map(|t| t.id), Some(1));
        assert!(q.get().is_none());
    }

    #[test]
    fn test_negative_keys_precede_positive() {
        let shared = Shared::for_tests();
        let fresh = task(&shared, 1);
        let old = task(&shared, 2);

        let mut q = WaitQueue::new();
        q.put(1 << 50, Arc::downgrade(&old));
        q.put(-5, Arc::downgrade(&fresh));

        assert_eq!(q.get().map(|t| t.id), Some(1));
        assert_eq!(q.get().map(|t| t.id), Some(2));
    }

    #[test]
    fn test_dropped_tasks_are_skipped() {
        let shared = Shared::for_tests();
        let kept = task(&shared, 1);
        let dropped = task(&shared, 2);

        let mut q = WaitQueue::new();
        q.put(1, Arc::downgrade(&dropped));
        q.put(2, Arc::downgrade(&kept));
        drop(dropped);

        assert_eq!(q.get().map(|t| t.id), Some(1));
        assert!(q.get().is_none());
    }

    #[test]
    fn test_empty_queue() {
        let mut q = WaitQueue::new();
        assert!(q.is_empty());
        assert!(q.get().is_none());
    }
}
