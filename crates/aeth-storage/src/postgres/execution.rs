use crate::pool::map_sqlx_err;
use aeth_core::execution::Execution;
use aeth_core::repo::ExecutionRepo;
use aeth_core::{AethError, ExecutionId, VmId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: uuid::Uuid,
    vm_id: uuid::Uuid,
    command: String,
    args: Json<Vec<String>>,
    exit_code: i32,
    stdout: String,
    stderr: String,
    secret_redacted: bool,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
}

impl From<ExecutionRow> for Execution {
    fn from(row: ExecutionRow) -> Self {
        Execution {
            id: ExecutionId::from_uuid(row.id),
            vm_id: VmId::from_uuid(row.vm_id),
            command: row.command,
            args: row.args.0,
            exit_code: row.exit_code,
            stdout: row.stdout,
            stderr: row.stderr,
            secret_redacted: row.secret_redacted,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
        }
    }
}

pub struct PgExecutionRepo {
    pool: PgPool,
}

impl PgExecutionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepo for PgExecutionRepo {
    async fn create(&self, execution: &Execution) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO executions (id, vm_id, command, args, exit_code, stdout, stderr, \
             secret_redacted, started_at, completed_at, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(execution.id.as_uuid())
        .bind(execution.vm_id.as_uuid())
        .bind(&execution.command)
        .bind(Json(&execution.args))
        .bind(execution.exit_code)
        .bind(&execution.stdout)
        .bind(&execution.stderr)
        .bind(execution.secret_redacted)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating execution", e))?;
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, AethError> {
        sqlx::query_as::<_, ExecutionRow>("SELECT * FROM executions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("execution", e))
            .map(Execution::from)
    }

    async fn list_by_vm(&self, vm_id: VmId) -> Result<Vec<Execution>, AethError> {
        sqlx::query_as::<_, ExecutionRow>("SELECT * FROM executions WHERE vm_id = $1 ORDER BY started_at")
            .bind(vm_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing executions for vm", e))
            .map(|rows| rows.into_iter().map(Execution::from).collect())
    }
}
