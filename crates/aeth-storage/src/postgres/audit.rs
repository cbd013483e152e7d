use crate::pool::map_sqlx_err;
use aeth_core::audit::AuditEvent;
use aeth_core::repo::AuditRepo;
use aeth_core::AethError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: uuid::Uuid,
    actor: String,
    action: String,
    target: String,
    at: DateTime<Utc>,
    detail: Option<Json<serde_json::Value>>,
}

impl From<AuditEventRow> for AuditEvent {
    fn from(row: AuditEventRow) -> Self {
        AuditEvent {
            id: row.id,
            actor: row.actor,
            action: row.action,
            target: row.target,
            at: row.at,
            detail: row.detail.map(|d| d.0),
        }
    }
}

pub struct PgAuditRepo {
    pool: PgPool,
}

impl PgAuditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepo for PgAuditRepo {
    async fn record(&self, event: &AuditEvent) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO audit_events (id, actor, action, target, at, detail) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(&event.actor)
        .bind(&event.action)
        .bind(&event.target)
        .bind(event.at)
        .bind(event.detail.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("recording audit event", e))?;
        Ok(())
    }

    async fn list_for_target(&self, target: &str) -> Result<Vec<AuditEvent>, AethError> {
        sqlx::query_as::<_, AuditEventRow>(
            "SELECT * FROM audit_events WHERE target = $1 ORDER BY at DESC",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("listing audit events for target", e))
        .map(|rows| rows.into_iter().map(AuditEvent::from).collect())
    }
}
