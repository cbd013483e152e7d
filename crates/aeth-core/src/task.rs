//! Units of asynchronous work dispatched through the task queue (§3, §4.1).

use crate::{AethError, TaskId, VmId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Active,
    Completed,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    VmCreate,
    VmExecute,
    VmDelete,
    WorkspaceCreate,
    WorkspaceDelete,
    PromptExecute,
    JobExecute,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VmCreate => "vm:create",
            Self::VmExecute => "vm:execute",
            Self::VmDelete => "vm:delete",
            Self::WorkspaceCreate => "workspace:create",
            Self::WorkspaceDelete => "workspace:delete",
            Self::PromptExecute => "prompt:execute",
            Self::JobExecute => "job:execute",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub vm_id: Option<VmId>,
    pub worker_id: Option<WorkerId>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(task_type: TaskType, payload: serde_json::Value, max_retries: u32) -> Self {
        Self {
            id: TaskId::new(),
            task_type,
            status: TaskStatus::Pending,
            priority: 0,
            payload,
            vm_id: None,
            worker_id: None,
            max_retries,
            retry_count: 0,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn claim(&mut self, worker: WorkerId) {
        self.status = TaskStatus::Active;
        self.worker_id = Some(worker);
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
    }

    /// Applies the §4.1 outcome rule: retryable failures move to Retrying
    /// with `(retry_count+1)²` second backoff while budget remains,
    /// terminal failures (or exhausted budget) move to Failed.
    pub fn fail(&mut self, error: &AethError) {
        self.error = Some(error.message.clone());
        let next_retry = self.retry_count + 1;
        if error.is_retryable() && next_retry <= self.max_retries {
            self.retry_count = next_retry;
            self.status = TaskStatus::Retrying;
            let delay = crate::retry::backoff_delay(next_retry);
            self.scheduled_at = Utc::now() + chrono::Duration::from_std(delay).unwrap();
        } else {
            self.status = TaskStatus::Failed;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Retrying) && self.scheduled_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_count_stays_within_max_retries() {
        let mut t = Task::new(TaskType::VmExecute, serde_json::json!({}), 2);
        let err = AethError::unavailable("vsock dial failed");
        t.fail(&err);
        assert_eq!(t.status, TaskStatus::Retrying);
        assert_eq!(t.retry_count, 1);
        t.fail(&err);
        assert_eq!(t.retry_count, 2);
        t.fail(&err);
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 2);
    }

    #[test]
    fn terminal_error_kinds_skip_retry() {
        let mut t = Task::new(TaskType::VmDelete, serde_json::json!({}), 5);
        t.fail(&AethError::not_found("vm missing"));
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn backoff_delay_matches_the_square_law() {
        let mut t = Task::new(TaskType::VmExecute, serde_json::json!({}), 3);
        let before = Utc::now();
        t.fail(&AethError::timeout("deadline exceeded"));
        let delta = t.scheduled_at - before;
        assert!(delta.num_seconds() >= 1 && delta.num_seconds() <= 2);
    }

    #[test]
    fn task_type_wire_names_match_the_spec() {
        assert_eq!(TaskType::VmCreate.as_str(), "vm:create");
        assert_eq!(TaskType::PromptExecute.as_str(), "prompt:execute");
    }
}
