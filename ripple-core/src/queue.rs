//! Stable Priority Queue
//!
//! The flush scheduler needs a priority queue with deterministic ordering:
//! higher-priority items pop first, and items with equal priority pop in the
//! order they were inserted (FIFO tie-break).
//!
//! A plain `BinaryHeap` does not guarantee the tie-break, so each entry
//! carries a monotonically increasing sequence number and ordering compares
//! `(priority, sequence)`. The item itself is never compared, which keeps
//! the queue free of any `Ord` bound on `T`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A priority queue with FIFO ordering among equal priorities.
pub struct PriorityQueueFifo<T> {
    heap: BinaryHeap<Entry<T>>,
    counter: u64,
}

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins; among equal priorities the lower
        // sequence number (inserted earlier) wins.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PriorityQueueFifo<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }

    /// Insert an item with the given priority.
    pub fn put(&mut self, priority: i32, item: T) {
        self.counter += 1;
        self.heap.push(Entry {
            priority,
            seq: self.counter,
            item,
        });
    }

    /// Remove and return the highest-priority item, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// True if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl<T> Default for PriorityQueueFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_higher_priority_first() {
        let mut q = PriorityQueueFifo::new();
        q.put(1, "low");
        q.put(10, "high");
        q.put(5, "mid");

        assert_eq!(q.pop(), Some("high"));
        assert_eq!(q.pop(), Some("mid"));
        assert_eq!(q.pop(), Some("low"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn equal_priorities_pop_in_insertion_order() {
        let mut q = PriorityQueueFifo::new();
        q.put(0, "a");
        q.put(0, "b");
        q.put(0, "c");

        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("c"));
    }

    #[test]
    fn mixed_priorities_keep_fifo_within_each_level() {
        let mut q = PriorityQueueFifo::new();
        q.put(1, 1);
        q.put(2, 2);
        q.put(1, 3);
        q.put(2, 4);

        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn len_and_empty() {
        let mut q = PriorityQueueFifo::new();
        assert!(q.is_empty());

        q.put(0, ());
        q.put(0, ());
        assert_eq!(q.len(), 2);
        assert!(!q.is_empty());

        q.pop();
        q.pop();
        assert!(q.is_empty());
    }

    #[test]
    fn negative_priorities_pop_last() {
        let mut q = PriorityQueueFifo::new();
        q.put(-1, "after");
        q.put(0, "default");
        assert_eq!(q.pop(), Some("default"));
        assert_eq!(q.pop(), Some("after"));
    }
}
