//! Allocation result handle and dispatch errors

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Reasons an allocation does not run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no instances registered")]
    NoInstances,

    #[error("all instances blocked")]
    AllInstancesBlocked,

    /// The request was dropped undecided: its work panicked, or the
    /// dispatcher went away while it was queued
    #[error("request dropped before completion")]
    Abandoned,
}

/// Successful dispatch: the work ran to completion on `address`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub task_id: Uuid,
    pub address: String,
}

pub type DispatchResult = Result<Dispatched, DispatchError>;

/// Sender half kept by the dispatcher until the request is decided
pub(crate) type Reply = oneshot::Sender<DispatchResult>;

/// Deferred result of [`Dispatcher::allocate`](super::Dispatcher::allocate)
///
/// A direct dispatch or a rejection comes back already resolved. A queued
/// request comes back pending and resolves when a later release drains it.
/// There is no timeout on queued requests.
#[derive(Debug)]
pub struct Allocation {
    task_id: Uuid,
    rx: oneshot::Receiver<DispatchResult>,
    resolved: Option<DispatchResult>,
}

impl Allocation {
    pub(crate) fn new(task_id: Uuid) -> (Self, Reply) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                task_id,
                rx,
                resolved: None,
            },
            tx,
        )
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// True while the request waits in the backlog
    pub fn is_pending(&mut self) -> bool {
        self.try_outcome().is_none()
    }

    /// Non-blocking look at the outcome
    pub fn try_outcome(&mut self) -> Option<&DispatchResult> {
        if self.resolved.is_none() {
            match self.rx.try_recv() {
                Ok(result) => self.resolved = Some(result),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    debug!(task_id = %self.task_id, "Allocation::try_outcome: sender dropped");
                    self.resolved = Some(Err(DispatchError::Abandoned));
                }
            }
        }
        self.resolved.as_ref()
    }

    /// Wait for the outcome
    pub async fn outcome(self) -> DispatchResult {
        if let Some(result) = self.resolved {
            return result;
        }
        self.rx.await.unwrap_or(Err(DispatchError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_until_resolved() {
        let task_id = Uuid::now_v7();
        let (mut allocation, reply) = Allocation::new(task_id);
        assert!(allocation.is_pending());

        reply
            .send(Ok(Dispatched {
                task_id,
                address: "a".to_string(),
            }))
            .unwrap();

        assert!(!allocation.is_pending());
        let result = allocation.outcome().await.unwrap();
        assert_eq!(result.address, "a");
        assert_eq!(result.task_id, task_id);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_abandoned() {
        let (allocation, reply) = Allocation::new(Uuid::now_v7());
        drop(reply);
        assert_eq!(allocation.outcome().await, Err(DispatchError::Abandoned));
    }

    #[test]
    fn test_rejection_reason_text() {
        assert_eq!(DispatchError::AllInstancesBlocked.to_string(), "all instances blocked");
        assert_eq!(DispatchError::NoInstances.to_string(), "no instances registered");
    }
}
