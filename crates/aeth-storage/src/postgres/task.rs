use crate::pool::map_sqlx_err;
use aeth_core::repo::TaskRepo;
use aeth_core::task::{Task, TaskStatus, TaskType};
use aeth_core::{AethError, TaskId, VmId, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

fn status_to_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Scheduled => "scheduled",
        TaskStatus::Active => "active",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Retrying => "retrying",
    }
}

fn status_from_str(s: &str) -> Result<TaskStatus, AethError> {
    Ok(match s {
        "pending" => TaskStatus::Pending,
        "scheduled" => TaskStatus::Scheduled,
        "active" => TaskStatus::Active,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "retrying" => TaskStatus::Retrying,
        other => return Err(AethError::internal(format!("unknown task status {other:?} in storage"))),
    })
}

fn type_to_str(t: TaskType) -> &'static str {
    t.as_str()
}

fn type_from_str(s: &str) -> Result<TaskType, AethError> {
    Ok(match s {
        "vm:create" => TaskType::VmCreate,
        "vm:execute" => TaskType::VmExecute,
        "vm:delete" => TaskType::VmDelete,
        "workspace:create" => TaskType::WorkspaceCreate,
        "workspace:delete" => TaskType::WorkspaceDelete,
        "prompt:execute" => TaskType::PromptExecute,
        "job:execute" => TaskType::JobExecute,
        other => return Err(AethError::internal(format!("unknown task type {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: uuid::Uuid,
    task_type: String,
    status: String,
    priority: i32,
    payload: serde_json::Value,
    vm_id: Option<uuid::Uuid>,
    worker_id: Option<uuid::Uuid>,
    max_retries: i32,
    retry_count: i32,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, AethError> {
        Ok(Task {
            id: TaskId::from_uuid(self.id),
            task_type: type_from_str(&self.task_type)?,
            status: status_from_str(&self.status)?,
            priority: self.priority,
            payload: self.payload,
            vm_id: self.vm_id.map(VmId::from_uuid),
            worker_id: self.worker_id.map(WorkerId::from_uuid),
            max_retries: self.max_retries as u32,
            retry_count: self.retry_count as u32,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error,
        })
    }
}

pub struct PgTaskRepo {
    pool: PgPool,
}

impl PgTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepo for PgTaskRepo {
    async fn create(&self, task: &Task) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO tasks (id, task_type, status, priority, payload, vm_id, worker_id, \
             max_retries, retry_count, scheduled_at, started_at, completed_at, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(task.id.as_uuid())
        .bind(type_to_str(task.task_type))
        .bind(status_to_str(task.status))
        .bind(task.priority)
        .bind(&task.payload)
        .bind(task.vm_id.map(|id| id.as_uuid()))
        .bind(task.worker_id.map(|id| id.as_uuid()))
        .bind(task.max_retries as i32)
        .bind(task.retry_count as i32)
        .bind(task.scheduled_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating task", e))?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, AethError> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("task", e))?
            .into_task()
    }

    async fn update(&self, task: &Task) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE tasks SET status = $2, worker_id = $3, retry_count = $4, scheduled_at = $5, \
             started_at = $6, completed_at = $7, error = $8 WHERE id = $1",
        )
        .bind(task.id.as_uuid())
        .bind(status_to_str(task.status))
        .bind(task.worker_id.map(|id| id.as_uuid()))
        .bind(task.retry_count as i32)
        .bind(task.scheduled_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating task", e))?;
        Ok(())
    }

    /// `SELECT ... FOR UPDATE SKIP LOCKED` so two workers racing for the same
    /// due task never both claim it.
    async fn get_next_pending(&self, worker_id: WorkerId) -> Result<Task, AethError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_err("starting transaction", e))?;
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status IN ('pending', 'retrying') AND scheduled_at <= now() \
             ORDER BY priority DESC, scheduled_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_err("claiming next task", e))?
        .ok_or_else(|| AethError::not_found("no pending task"))?;

        sqlx::query("UPDATE tasks SET status = 'active', worker_id = $2, started_at = now() WHERE id = $1")
            .bind(row.id)
            .bind(worker_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("claiming next task", e))?;
        tx.commit().await.map_err(|e| map_sqlx_err("committing claim", e))?;

        let mut task = row.into_task()?;
        task.claim(worker_id);
        Ok(task)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, AethError> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE status = $1 ORDER BY scheduled_at")
            .bind(status_to_str(status))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing tasks by status", e))?
            .into_iter()
            .map(TaskRow::into_task)
            .collect()
    }
}
