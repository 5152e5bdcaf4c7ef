//! FIFO task queue
//!
//! Insertion order is scheduling order: the run loop dequeues the front,
//! steps it, and reschedules at the tail. Predicate search is what `fork`
//! and `kill` use to locate processes by id.

use crate::process::Process;
use std::collections::VecDeque;

/// Ordered container of runnable processes.
#[derive(Default)]
pub struct TaskQueue {
    items: VecDeque<Process>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append a process at the tail.
    pub fn enqueue(&mut self, process: Process) {
        self.items.push_back(process);
    }

    /// Remove and return the front process.
    pub fn dequeue(&mut self) -> Option<Process> {
        self.items.pop_front()
    }

    /// True when no process is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued processes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Index of the first process matching the predicate, scanning
    /// front-to-back.
    pub fn find_index<P>(&self, predicate: P) -> Option<usize>
    where
        P: FnMut(&Process) -> bool,
    {
        self.items.iter().position(predicate)
    }

    /// First process matching the predicate.
    pub fn find<P>(&self, mut predicate: P) -> Option<&Process>
    where
        P: FnMut(&Process) -> bool,
    {
        self.items.iter().find(|process| predicate(process))
    }

    /// Remove the process at `index`, preserving the order of the rest.
    pub fn remove(&mut self, index: usize) -> Option<Process> {
        self.items.remove(index)
    }

    /// Iterate the queued processes in scheduling order.
    pub fn values(&self) -> impl Iterator<Item = &Process> {
        self.items.iter()
    }

    /// Drop every queued process.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::CoroutineSource;
    use crate::process::ProcessId;
    use crate::value::Value;

    fn process(id: &str) -> Process {
        Process::new(
            ProcessId::from(id),
            CoroutineSource::callable(|| Ok(crate::coroutine::Sourced::Value(Value::Null))),
        )
    }

    #[test]
    fn test_dequeue_is_fifo() {
        let mut queue = TaskQueue::new();
        queue.enqueue(process("1"));
        queue.enqueue(process("2"));
        queue.enqueue(process("3"));

        assert_eq!(queue.dequeue().unwrap().id().as_str(), "1");
        assert_eq!(queue.dequeue().unwrap().id().as_str(), "2");
        assert_eq!(queue.dequeue().unwrap().id().as_str(), "3");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_find_index_scans_front_to_back() {
        let mut queue = TaskQueue::new();
        queue.enqueue(process("1"));
        queue.enqueue(process("2"));

        assert_eq!(queue.find_index(|p| p.id().as_str() == "2"), Some(1));
        assert_eq!(queue.find_index(|p| p.id().as_str() == "9"), None);
    }

    #[test]
    fn test_remove_keeps_lookups_consistent() {
        let mut queue = TaskQueue::new();
        queue.enqueue(process("1"));
        queue.enqueue(process("2"));
        queue.enqueue(process("3"));

        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.id().as_str(), "2");

        // the remaining entries are still found at their logical spots
        assert_eq!(queue.find_index(|p| p.id().as_str() == "1"), Some(0));
        assert_eq!(queue.find_index(|p| p.id().as_str() == "3"), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_find_returns_first_match() {
        let mut queue = TaskQueue::new();
        queue.enqueue(process("1"));
        queue.enqueue(process("1_2"));

        let found = queue.find(|p| p.id().as_str().starts_with('1')).unwrap();
        assert_eq!(found.id().as_str(), "1");
    }

    #[test]
    fn test_clear_empties_queue() {
        let mut queue = TaskQueue::new();
        queue.enqueue(process("1"));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.values().count(), 0);
    }
}
