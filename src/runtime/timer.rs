//! Deadline-ordered heap of sleeping tasks.

use crate::common::TaskId;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Entry in the timer heap
#[derive(Debug, Eq, PartialEq)]
struct TimerEntry {
    wake_time: Instant,
    task_id: TaskId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest deadline must surface first.
        other
            .wake_time
            .cmp(&self.wake_time)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerHeap {
    pub fn push(&mut self, wake_time: Instant, task_id: TaskId) {
        self.heap.push(TimerEntry { wake_time, task_id });
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.wake_time)
    }

    /// Remove and return every task whose deadline is at or before `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TaskId> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.wake_time > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.task_id);
            }
        }
        expired
    }
}
