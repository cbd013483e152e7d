use crate::pool::map_sqlx_err;
use aeth_core::environment::AiAssistant;
use aeth_core::repo::WorkspaceRepo;
use aeth_core::workspace::{Workspace, WorkspaceStatus};
use aeth_core::{AethError, EnvironmentId, VmId, WorkspaceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

fn status_to_str(s: WorkspaceStatus) -> &'static str {
    match s {
        WorkspaceStatus::Creating => "creating",
        WorkspaceStatus::Preparing => "preparing",
        WorkspaceStatus::Spawning => "spawning",
        WorkspaceStatus::Ready => "ready",
        WorkspaceStatus::Idle => "idle",
        WorkspaceStatus::Failed => "failed",
        WorkspaceStatus::Stopped => "stopped",
    }
}

fn status_from_str(s: &str) -> Result<WorkspaceStatus, AethError> {
    Ok(match s {
        "creating" => WorkspaceStatus::Creating,
        "preparing" => WorkspaceStatus::Preparing,
        "spawning" => WorkspaceStatus::Spawning,
        "ready" => WorkspaceStatus::Ready,
        "idle" => WorkspaceStatus::Idle,
        "failed" => WorkspaceStatus::Failed,
        "stopped" => WorkspaceStatus::Stopped,
        other => return Err(AethError::internal(format!("unknown workspace status {other:?} in storage"))),
    })
}

fn assistant_to_str(a: AiAssistant) -> &'static str {
    match a {
        AiAssistant::ClaudeCode => "claude-code",
        AiAssistant::Ampcode => "ampcode",
    }
}

fn assistant_from_str(s: &str) -> Result<AiAssistant, AethError> {
    Ok(match s {
        "claude-code" => AiAssistant::ClaudeCode,
        "ampcode" => AiAssistant::Ampcode,
        other => return Err(AethError::internal(format!("unknown ai assistant {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: uuid::Uuid,
    name: String,
    description: Option<String>,
    vm_id: Option<uuid::Uuid>,
    environment_id: Option<uuid::Uuid>,
    status: String,
    ai_assistant: String,
    working_dir: String,
    idle_since: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    ready_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl WorkspaceRow {
    fn into_workspace(self) -> Result<Workspace, AethError> {
        Ok(Workspace {
            id: WorkspaceId::from_uuid(self.id),
            name: self.name,
            description: self.description,
            vm_id: self.vm_id.map(VmId::from_uuid),
            environment_id: self.environment_id.map(EnvironmentId::from_uuid),
            status: status_from_str(&self.status)?,
            ai_assistant: assistant_from_str(&self.ai_assistant)?,
            working_dir: self.working_dir,
            idle_since: self.idle_since,
            created_at: self.created_at,
            ready_at: self.ready_at,
            stopped_at: self.stopped_at,
        })
    }
}

pub struct PgWorkspaceRepo {
    pool: PgPool,
}

impl PgWorkspaceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRepo for PgWorkspaceRepo {
    async fn create(&self, ws: &Workspace) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO workspaces (id, name, description, vm_id, environment_id, status, \
             ai_assistant, working_dir, idle_since, created_at, ready_at, stopped_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(ws.id.as_uuid())
        .bind(&ws.name)
        .bind(&ws.description)
        .bind(ws.vm_id.map(|id| id.as_uuid()))
        .bind(ws.environment_id.map(|id| id.as_uuid()))
        .bind(status_to_str(ws.status))
        .bind(assistant_to_str(ws.ai_assistant))
        .bind(&ws.working_dir)
        .bind(ws.idle_since)
        .bind(ws.created_at)
        .bind(ws.ready_at)
        .bind(ws.stopped_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating workspace", e))?;
        Ok(())
    }

    async fn get(&self, id: WorkspaceId) -> Result<Workspace, AethError> {
        sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("workspace", e))?
            .into_workspace()
    }

    async fn update(&self, ws: &Workspace) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE workspaces SET name = $2, description = $3, vm_id = $4, status = $5, \
             idle_since = $6, ready_at = $7, stopped_at = $8 WHERE id = $1",
        )
        .bind(ws.id.as_uuid())
        .bind(&ws.name)
        .bind(&ws.description)
        .bind(ws.vm_id.map(|id| id.as_uuid()))
        .bind(status_to_str(ws.status))
        .bind(ws.idle_since)
        .bind(ws.ready_at)
        .bind(ws.stopped_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating workspace", e))?;
        Ok(())
    }

    async fn delete(&self, id: WorkspaceId) -> Result<(), AethError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_err("starting transaction", e))?;
        sqlx::query("DELETE FROM prompt_tasks WHERE workspace_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("deleting workspace prompt tasks", e))?;
        sqlx::query("DELETE FROM prep_steps WHERE workspace_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("deleting workspace prep steps", e))?;
        sqlx::query("DELETE FROM secrets WHERE workspace_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("deleting workspace secrets", e))?;
        sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("deleting workspace", e))?;
        tx.commit().await.map_err(|e| map_sqlx_err("committing workspace delete", e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Workspace>, AethError> {
        sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing workspaces", e))?
            .into_iter()
            .map(WorkspaceRow::into_workspace)
            .collect()
    }

    async fn list_idle_with_vms(&self) -> Result<Vec<Workspace>, AethError> {
        sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE vm_id IS NOT NULL AND idle_since IS NOT NULL \
             ORDER BY idle_since ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("listing idle workspaces", e))?
        .into_iter()
        .map(WorkspaceRow::into_workspace)
        .collect()
    }
}
