//! Binary min-heap of queued tasks keyed by start time.
//!
//! A generic heap only exposes push/pop; updates and cancellations need to
//! remove or replace an entry found by ID, so the sift primitives work from
//! any index.

use crate::error::QueueError;
use crate::task::{Task, TaskId};

struct Entry {
    /// Insertion order, breaks ties between equal start times (FIFO).
    seq: u64,
    task: Task,
}

/// Tasks waiting for their start time, earliest first.
#[derive(Default)]
pub struct TaskQueue {
    heap: Vec<Entry>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Add a task in heap order. Does not check for duplicate IDs.
    pub fn insert(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, task });
        self.sift_up(self.heap.len() - 1);
    }

    pub fn peek_min(&self) -> Option<&Task> {
        self.heap.first().map(|e| &e.task)
    }

    pub fn pop_min(&mut self) -> Option<Task> {
        if self.heap.is_empty() {
            return None;
        }
        self.remove_at(0).ok()
    }

    /// Heap index of the task with `id`, by linear scan.
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.heap.iter().position(|e| &e.task.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.heap.get(index).map(|e| &e.task)
    }

    /// Remove the task at `index` and restore heap order.
    pub fn remove_at(&mut self, index: usize) -> Result<Task, QueueError> {
        self.check(index)?;
        let removed = self.heap.swap_remove(index).task;
        if index < self.heap.len() {
            self.fix(index);
        }
        Ok(removed)
    }

    /// Put `task` at `index` in place of the current entry and restore heap
    /// order. The replaced task is returned; its tie-break position is kept.
    pub fn replace_at(&mut self, index: usize, task: Task) -> Result<Task, QueueError> {
        self.check(index)?;
        let old = std::mem::replace(&mut self.heap[index].task, task);
        self.fix(index);
        Ok(old)
    }

    /// Iterate in heap (not start-time) order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.heap.iter().map(|e| &e.task)
    }

    /// Remove every task, in no particular order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.heap.drain(..).map(|e| e.task).collect()
    }

    // --- private helpers ---------------------------------------------------

    fn check(&self, index: usize) -> Result<(), QueueError> {
        if index >= self.heap.len() {
            return Err(QueueError::OutOfBounds {
                index,
                len: self.heap.len(),
            });
        }
        Ok(())
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (a, b) = (&self.heap[a], &self.heap[b]);
        (a.task.window.start, a.seq) < (b.task.window.start, b.seq)
    }

    fn fix(&mut self, index: usize) {
        if !self.sift_down(index) {
            self.sift_up(index);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent) {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    /// Returns whether the entry moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.heap.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, index) {
                break;
            }
            self.heap.swap(index, child);
            index = child;
        }
        index != start
    }
}
