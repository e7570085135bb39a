//! # Task Queue
//!
//! At-least-once delivery of task references. A dequeued reference is leased
//! to one worker; if the lease is neither acknowledged nor extended before it
//! expires, the reference becomes visible again and is redelivered ahead of
//! newer work. Consumers must therefore treat every delivery as possibly
//! duplicate and re-check the task in the job store.

use crate::store::TaskRef;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;

pub use memory::InMemoryTaskQueue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("lease {0} is unknown or has expired")]
    LeaseExpired(Uuid),
}

/// A reference handed to one worker for a bounded time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: Uuid,
    pub task: TaskRef,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub in_flight: usize,
}

/// # Task Queue
///
/// Injected into the batch manager (producer side) and the worker pool
/// (consumer side) as `Arc<dyn TaskQueue>`.
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append references in order. All or nothing.
    async fn enqueue(&self, refs: Vec<TaskRef>) -> Result<(), QueueError>;

    /// Lease the oldest visible reference for `lease_for`, waiting up to
    /// `wait` for one to appear. `Ok(None)` means the wait elapsed.
    async fn dequeue(&self, lease_for: Duration, wait: Duration) -> Result<Option<Lease>, QueueError>;

    /// Remove a leased reference for good.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Push a lease's deadline out to `lease_for` from now.
    async fn extend(&self, lease: &Lease, lease_for: Duration) -> Result<(), QueueError>;

    async fn stats(&self) -> QueueStats;

    /// Reject further enqueues and wake every blocked consumer. Enqueues
    /// already in progress complete first.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
