//! FIFO backlog of requests waiting for capacity

use std::collections::VecDeque;
use std::time::Instant;

use uuid::Uuid;

use super::allocation::Reply;
use super::work::Work;

/// A request that could not run when it arrived
pub(crate) struct PendingRequest {
    pub task_id: Uuid,
    pub work: Box<dyn Work>,
    pub reply: Reply,
    pub enqueued_at: Instant,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("task_id", &self.task_id)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Strict FIFO holding queue
#[derive(Debug, Default)]
pub(crate) struct Backlog {
    queue: VecDeque<PendingRequest>,
}

impl Backlog {
    pub fn push(&mut self, request: PendingRequest) {
        self.queue.push_back(request);
    }

    /// Remove the oldest request
    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.queue.pop_front()
    }

    /// Put a request back at the head, ahead of everything queued after it
    pub fn requeue(&mut self, request: PendingRequest) {
        self.queue.push_front(request);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
