use crate::pool::map_sqlx_err;
use aeth_core::repo::VmRepo;
use aeth_core::vm::{Vm, VmStatus};
use aeth_core::{AethError, VmId, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;

fn status_to_str(s: VmStatus) -> &'static str {
    match s {
        VmStatus::Created => "created",
        VmStatus::Starting => "starting",
        VmStatus::Running => "running",
        VmStatus::Stopping => "stopping",
        VmStatus::Stopped => "stopped",
        VmStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> Result<VmStatus, AethError> {
    Ok(match s {
        "created" => VmStatus::Created,
        "starting" => VmStatus::Starting,
        "running" => VmStatus::Running,
        "stopping" => VmStatus::Stopping,
        "stopped" => VmStatus::Stopped,
        "failed" => VmStatus::Failed,
        other => return Err(AethError::internal(format!("unknown vm status {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct VmRow {
    id: uuid::Uuid,
    name: String,
    orchestrator_tag: String,
    status: String,
    kernel_path: String,
    rootfs_path: String,
    socket_path: String,
    vcpu_count: i32,
    memory_mb: i32,
    worker_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    metadata: Json<HashMap<String, String>>,
}

impl VmRow {
    fn into_vm(self) -> Result<Vm, AethError> {
        Ok(Vm {
            id: VmId::from_uuid(self.id),
            name: self.name,
            orchestrator_tag: self.orchestrator_tag,
            status: status_from_str(&self.status)?,
            kernel_path: self.kernel_path,
            rootfs_path: self.rootfs_path,
            socket_path: self.socket_path,
            vcpu_count: self.vcpu_count as u32,
            memory_mb: self.memory_mb as u32,
            worker_id: self.worker_id.map(WorkerId::from_uuid),
            created_at: self.created_at,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            metadata: self.metadata.0,
        })
    }
}

pub struct PgVmRepo {
    pool: PgPool,
}

impl PgVmRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VmRepo for PgVmRepo {
    async fn create(&self, vm: &Vm) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO vms (id, name, orchestrator_tag, status, kernel_path, rootfs_path, \
             socket_path, vcpu_count, memory_mb, worker_id, created_at, started_at, stopped_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(vm.id.as_uuid())
        .bind(&vm.name)
        .bind(&vm.orchestrator_tag)
        .bind(status_to_str(vm.status))
        .bind(&vm.kernel_path)
        .bind(&vm.rootfs_path)
        .bind(&vm.socket_path)
        .bind(vm.vcpu_count as i32)
        .bind(vm.memory_mb as i32)
        .bind(vm.worker_id.map(|id| id.as_uuid()))
        .bind(vm.created_at)
        .bind(vm.started_at)
        .bind(vm.stopped_at)
        .bind(Json(&vm.metadata))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating vm", e))?;
        Ok(())
    }

    async fn get(&self, id: VmId) -> Result<Vm, AethError> {
        sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("vm", e))?
            .into_vm()
    }

    async fn get_by_name(&self, name: &str) -> Result<Vm, AethError> {
        sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("vm", e))?
            .into_vm()
    }

    async fn update(&self, vm: &Vm) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE vms SET status = $2, worker_id = $3, started_at = $4, stopped_at = $5, metadata = $6 \
             WHERE id = $1",
        )
        .bind(vm.id.as_uuid())
        .bind(status_to_str(vm.status))
        .bind(vm.worker_id.map(|id| id.as_uuid()))
        .bind(vm.started_at)
        .bind(vm.stopped_at)
        .bind(Json(&vm.metadata))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating vm", e))?;
        Ok(())
    }

    async fn delete(&self, id: VmId) -> Result<(), AethError> {
        sqlx::query("DELETE FROM vms WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("deleting vm", e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Vm>, AethError> {
        sqlx::query_as::<_, VmRow>("SELECT * FROM vms ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing vms", e))?
            .into_iter()
            .map(VmRow::into_vm)
            .collect()
    }

    async fn list_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Vm>, AethError> {
        sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE worker_id = $1 ORDER BY created_at")
            .bind(worker_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing vms for worker", e))?
            .into_iter()
            .map(VmRow::into_vm)
            .collect()
    }
}
