//! Pending-task heap: higher priority first, FIFO within a priority.

use crate::types::{GenerationRequest, RequestKey};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub(crate) struct PendingTask {
    pub key: RequestKey,
    pub priority: i32,
    pub sequence: u64,
    pub request: GenerationRequest,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for PendingTask {}

impl Ord for PendingTask {
    /// Max-heap: higher priority compares Greater; for equal priority the earlier arrival does
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.sequence.cmp(&other.sequence).reverse())
    }
}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<PendingTask>,
    next_sequence: u64,
}

impl PendingQueue {
    pub fn push(&mut self, request: GenerationRequest) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(PendingTask {
            key: request.key,
            priority: request.priority,
            sequence,
            request,
        });
    }

    pub fn pop(&mut self) -> Option<PendingTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Remove every task, in scheduling order
    pub fn drain(&mut self) -> Vec<PendingTask> {
        let mut drained = Vec::with_capacity(self.heap.len());
        while let Some(task) = self.heap.pop() {
            drained.push(task);
        }
        drained
    }
}
