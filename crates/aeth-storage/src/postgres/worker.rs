use crate::pool::map_sqlx_err;
use aeth_core::repo::WorkerRepo;
use aeth_core::worker::{Worker, WorkerStatus};
use aeth_core::{AethError, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashSet;

fn status_to_str(s: WorkerStatus) -> &'static str {
    match s {
        WorkerStatus::Active => "active",
        WorkerStatus::Draining => "draining",
        WorkerStatus::Offline => "offline",
    }
}

fn status_from_str(s: &str) -> Result<WorkerStatus, AethError> {
    Ok(match s {
        "active" => WorkerStatus::Active,
        "draining" => WorkerStatus::Draining,
        "offline" => WorkerStatus::Offline,
        other => return Err(AethError::internal(format!("unknown worker status {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: uuid::Uuid,
    hostname: String,
    advertise_addr: String,
    status: String,
    zone: String,
    capabilities: Json<HashSet<String>>,
    cpu_cores: i32,
    used_cpu: i32,
    memory_mb: i32,
    used_memory_mb: i32,
    disk_gb: i32,
    used_disk_gb: i32,
    vm_count: i32,
    max_vms: i32,
    last_seen: DateTime<Utc>,
    started_at: DateTime<Utc>,
}

impl WorkerRow {
    fn into_worker(self) -> Result<Worker, AethError> {
        Ok(Worker {
            id: WorkerId::from_uuid(self.id),
            hostname: self.hostname,
            advertise_addr: self.advertise_addr,
            status: status_from_str(&self.status)?,
            zone: self.zone,
            capabilities: self.capabilities.0,
            cpu_cores: self.cpu_cores as u32,
            used_cpu: self.used_cpu as u32,
            memory_mb: self.memory_mb as u32,
            used_memory_mb: self.used_memory_mb as u32,
            disk_gb: self.disk_gb as u32,
            used_disk_gb: self.used_disk_gb as u32,
            vm_count: self.vm_count as u32,
            max_vms: self.max_vms as u32,
            last_seen: self.last_seen,
            started_at: self.started_at,
        })
    }
}

pub struct PgWorkerRepo {
    pool: PgPool,
}

impl PgWorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepo for PgWorkerRepo {
    async fn create(&self, worker: &Worker) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO workers (id, hostname, advertise_addr, status, zone, capabilities, \
             cpu_cores, used_cpu, memory_mb, used_memory_mb, disk_gb, used_disk_gb, vm_count, \
             max_vms, last_seen, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.hostname)
        .bind(&worker.advertise_addr)
        .bind(status_to_str(worker.status))
        .bind(&worker.zone)
        .bind(Json(&worker.capabilities))
        .bind(worker.cpu_cores as i32)
        .bind(worker.used_cpu as i32)
        .bind(worker.memory_mb as i32)
        .bind(worker.used_memory_mb as i32)
        .bind(worker.disk_gb as i32)
        .bind(worker.used_disk_gb as i32)
        .bind(worker.vm_count as i32)
        .bind(worker.max_vms as i32)
        .bind(worker.last_seen)
        .bind(worker.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating worker", e))?;
        Ok(())
    }

    async fn get(&self, id: WorkerId) -> Result<Worker, AethError> {
        sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("worker", e))?
            .into_worker()
    }

    async fn update(&self, worker: &Worker) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE workers SET status = $2, used_cpu = $3, used_memory_mb = $4, used_disk_gb = $5, \
             vm_count = $6, last_seen = $7 WHERE id = $1",
        )
        .bind(worker.id.as_uuid())
        .bind(status_to_str(worker.status))
        .bind(worker.used_cpu as i32)
        .bind(worker.used_memory_mb as i32)
        .bind(worker.used_disk_gb as i32)
        .bind(worker.vm_count as i32)
        .bind(worker.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("updating worker", e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Worker>, AethError> {
        sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers ORDER BY hostname")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing workers", e))?
            .into_iter()
            .map(WorkerRow::into_worker)
            .collect()
    }

    async fn reserve_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
        let result = sqlx::query(
            "UPDATE workers SET used_cpu = used_cpu + $2, used_memory_mb = used_memory_mb + $3, \
             vm_count = vm_count + 1 \
             WHERE id = $1 AND used_cpu + $2 <= cpu_cores AND used_memory_mb + $3 <= memory_mb \
             AND vm_count + 1 <= max_vms",
        )
        .bind(id.as_uuid())
        .bind(cpu as i32)
        .bind(memory_mb as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("reserving worker capacity", e))?;

        if result.rows_affected() == 0 {
            // Either the worker doesn't exist or it has no free capacity;
            // `get` tells us which and gives the caller the right error kind.
            self.get(id).await?;
            return Err(AethError::exhausted(format!(
                "worker {id} has no free capacity for {cpu} vcpu / {memory_mb} MiB"
            )));
        }
        Ok(())
    }

    async fn release_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
        sqlx::query(
            "UPDATE workers SET used_cpu = GREATEST(used_cpu - $2, 0), \
             used_memory_mb = GREATEST(used_memory_mb - $3, 0), vm_count = GREATEST(vm_count - 1, 0) \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(cpu as i32)
        .bind(memory_mb as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("releasing worker capacity", e))?;
        Ok(())
    }
}
