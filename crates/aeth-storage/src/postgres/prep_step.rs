use crate::pool::map_sqlx_err;
use aeth_core::prep_step::{PrepStep, PrepStepKind, PrepStepStatus};
use aeth_core::repo::PrepStepRepo;
use aeth_core::{AethError, PrepStepId, WorkspaceId};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

fn status_to_str(s: PrepStepStatus) -> &'static str {
    match s {
        PrepStepStatus::Pending => "pending",
        PrepStepStatus::Running => "running",
        PrepStepStatus::Completed => "completed",
        PrepStepStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> Result<PrepStepStatus, AethError> {
    Ok(match s {
        "pending" => PrepStepStatus::Pending,
        "running" => PrepStepStatus::Running,
        "completed" => PrepStepStatus::Completed,
        "failed" => PrepStepStatus::Failed,
        other => return Err(AethError::internal(format!("unknown prep step status {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct PrepStepRow {
    id: uuid::Uuid,
    workspace_id: uuid::Uuid,
    step_order: i32,
    kind: Json<PrepStepKind>,
    status: String,
    exit_code: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
    duration_ms: Option<i64>,
}

impl PrepStepRow {
    fn into_step(self) -> Result<PrepStep, AethError> {
        Ok(PrepStep {
            id: PrepStepId::from_uuid(self.id),
            workspace_id: WorkspaceId::from_uuid(self.workspace_id),
            order: self.step_order,
            kind: self.kind.0,
            status: status_from_str(&self.status)?,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            duration_ms: self.duration_ms,
        })
    }
}

pub struct PgPrepStepRepo {
    pool: PgPool,
}

impl PgPrepStepRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrepStepRepo for PgPrepStepRepo {
    async fn create(&self, step: &PrepStep) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO prep_steps (id, workspace_id, step_order, kind, status, exit_code, \
             stdout, stderr, duration_ms) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(step.id.as_uuid())
        .bind(step.workspace_id.as_uuid())
        .bind(step.order)
        .bind(Json(&step.kind))
        .bind(status_to_str(step.status))
        .bind(step.exit_code)
        .bind(&step.stdout)
        .bind(&step.stderr)
        .bind(step.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating prep step", e))?;
        Ok(())
    }

    async fn update(&self, step: &PrepStep) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE prep_steps SET status = $2, exit_code = $3, stdout = $4, stderr = $5, \
             duration_ms = $6 WHERE id = $1",
        )
        .bind(step.id.as_uuid())
        .bind(status_to_str(step.status))
        .bind(step.exit_code)
        .bind(&step.stdout)
        .bind(&step.stderr)
        .bind(step.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating prep step", e))?;
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PrepStep>, AethError> {
        sqlx::query_as::<_, PrepStepRow>(
            "SELECT * FROM prep_steps WHERE workspace_id = $1 ORDER BY step_order ASC",
        )
        .bind(workspace_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("listing prep steps", e))?
        .into_iter()
        .map(PrepStepRow::into_step)
        .collect()
    }

    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError> {
        sqlx::query("DELETE FROM prep_steps WHERE workspace_id = $1")
            .bind(workspace_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("deleting prep steps", e))?;
        Ok(())
    }
}
