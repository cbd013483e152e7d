//! The contract every queue backend satisfies, regardless of durability.

use aeth_core::task::Task;
use aeth_core::{AethError, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
}

/// A backend must guarantee single-claim: a registered handler for a given
/// task type is invoked at most once concurrently for a given task id.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), AethError>;

    /// Atomically claims and returns the next due task, or `None` if
    /// nothing is ready yet.
    async fn claim_next(&self) -> Result<Option<Task>, AethError>;

    /// Persists the outcome of a claimed task: `Completed`, `Failed`, or
    /// re-enqueued as `Retrying` with its new `scheduled_at`.
    async fn settle(&self, task: Task) -> Result<(), AethError>;

    async fn get(&self, id: TaskId) -> Result<Task, AethError>;

    async fn stats(&self) -> Result<QueueStats, AethError>;
}
