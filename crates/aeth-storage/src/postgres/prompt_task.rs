use crate::pool::map_sqlx_err;
use aeth_core::prompt_task::{PromptTask, PromptTaskStatus};
use aeth_core::repo::PromptTaskRepo;
use aeth_core::{AethError, PromptTaskId, WorkspaceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;

fn status_to_str(s: PromptTaskStatus) -> &'static str {
    match s {
        PromptTaskStatus::Pending => "pending",
        PromptTaskStatus::Running => "running",
        PromptTaskStatus::Completed => "completed",
        PromptTaskStatus::Failed => "failed",
        PromptTaskStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Result<PromptTaskStatus, AethError> {
    Ok(match s {
        "pending" => PromptTaskStatus::Pending,
        "running" => PromptTaskStatus::Running,
        "completed" => PromptTaskStatus::Completed,
        "failed" => PromptTaskStatus::Failed,
        "cancelled" => PromptTaskStatus::Cancelled,
        other => return Err(AethError::internal(format!("unknown prompt task status {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct PromptTaskRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    prompt: String,
    system_prompt: Option<String>,
    working_dir: String,
    env_vars: Json<HashMap<String, String>>,
    priority: i32,
    status: String,
    exit_code: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl PromptTaskRow {
    fn into_task(self) -> Result<PromptTask, AethError> {
        Ok(PromptTask {
            id: PromptTaskId::from_uuid(self.id),
            workspace_id: WorkspaceId::from_uuid(self.workspace_id),
            prompt: self.prompt,
            system_prompt: self.system_prompt,
            working_dir: self.working_dir,
            env_vars: self.env_vars.0,
            priority: self.priority,
            status: status_from_str(&self.status)?,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

pub struct PgPromptTaskRepo {
    pool: PgPool,
}

impl PgPromptTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromptTaskRepo for PgPromptTaskRepo {
    async fn create(&self, task: &PromptTask) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO prompt_tasks (id, workspace_id, prompt, system_prompt, working_dir, \
             env_vars, priority, status, exit_code, stdout, stderr, created_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(task.id.as_uuid())
        .bind(task.workspace_id.as_uuid())
        .bind(&task.prompt)
        .bind(&task.system_prompt)
        .bind(&task.working_dir)
        .bind(Json(&task.env_vars))
        .bind(task.priority)
        .bind(status_to_str(task.status))
        .bind(task.exit_code)
        .bind(&task.stdout)
        .bind(&task.stderr)
        .bind(task.created_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating prompt task", e))?;
        Ok(())
    }

    async fn get(&self, id: PromptTaskId) -> Result<PromptTask, AethError> {
        sqlx::query_as::<_, PromptTaskRow>("SELECT * FROM prompt_tasks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("prompt task", e))?
            .into_task()
    }

    async fn update(&self, task: &PromptTask) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE prompt_tasks SET status = $2, exit_code = $3, stdout = $4, stderr = $5, \
             completed_at = $6 WHERE id = $1",
        )
        .bind(task.id.as_uuid())
        .bind(status_to_str(task.status))
        .bind(task.exit_code)
        .bind(&task.stdout)
        .bind(&task.stderr)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating prompt task", e))?;
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PromptTask>, AethError> {
        sqlx::query_as::<_, PromptTaskRow>(
            "SELECT * FROM prompt_tasks WHERE workspace_id = $1 ORDER BY created_at",
        )
        .bind(workspace_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("listing prompt tasks", e))?
        .into_iter()
        .map(PromptTaskRow::into_task)
        .collect()
    }
}
