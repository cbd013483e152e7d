//! Pure in-memory backend for tests: same claim contract as Redis, loses
//! durability on restart (§4.1).

use crate::backend::{QueueBackend, QueueStats};
use aeth_core::task::{Task, TaskStatus};
use aeth_core::{AethError, TaskId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryBackend {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn enqueue(&self, task: Task) -> Result<(), AethError> {
        self.tasks.lock().unwrap().insert(task.id, task);
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<Task>, AethError> {
        let mut tasks = self.tasks.lock().unwrap();
        let now = Utc::now();
        let next_id = tasks
            .values()
            .filter(|t| t.is_due(now))
            .min_by_key(|t| (std::cmp::Reverse(t.priority), t.scheduled_at))
            .map(|t| t.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let task = tasks.get_mut(&id).expect("id came from this map");
        task.status = TaskStatus::Active;
        task.started_at = Some(now);
        Ok(Some(task.clone()))
    }

    async fn settle(&self, task: Task) -> Result<(), AethError> {
        self.tasks.lock().unwrap().insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, AethError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AethError::not_found(format!("task {id} not found")))
    }

    async fn stats(&self) -> Result<QueueStats, AethError> {
        let tasks = self.tasks.lock().unwrap();
        let mut stats = QueueStats::default();
        for t in tasks.values() {
            match t.status {
                TaskStatus::Pending | TaskStatus::Scheduled => stats.pending += 1,
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Retrying => stats.retrying += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeth_core::task::TaskType;
    use serde_json::json;

    #[tokio::test]
    async fn claim_next_returns_none_when_nothing_is_due() {
        let backend = InMemoryBackend::new();
        assert!(backend.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_is_single_claim_per_task() {
        let backend = InMemoryBackend::new();
        let task = Task::new(TaskType::VmCreate, json!({}), 3);
        let id = task.id;
        backend.enqueue(task).await.unwrap();

        let claimed = backend.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Active);

        assert!(backend.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retrying_tasks_are_not_due_until_scheduled_at() {
        let backend = InMemoryBackend::new();
        let mut task = Task::new(TaskType::VmExecute, json!({}), 3);
        task.fail(&AethError::unavailable("transient"));
        assert_eq!(task.status, TaskStatus::Retrying);
        backend.settle(task).await.unwrap();

        assert!(backend.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_buckets_match_task_status() {
        let backend = InMemoryBackend::new();
        backend
            .enqueue(Task::new(TaskType::VmCreate, json!({}), 3))
            .await
            .unwrap();
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.active, 0);
    }
}
