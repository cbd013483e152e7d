//! Worker registry (§4.9): `DrainWorker`/`ActivateWorker` over C1's
//! `WorkerRepo`, plus the per-worker VM index via `VmRepo::list_by_worker`.

use aeth_core::node::{NodeInfo, NodeStats};
use aeth_core::repo::{VmRepo, WorkerRepo};
use aeth_core::vm::Vm;
use aeth_core::worker::{Worker, WorkerStatus};
use aeth_core::{AethError, WorkerId};
use std::sync::Arc;

pub struct WorkerRegistry {
    worker_repo: Arc<dyn WorkerRepo>,
    vm_repo: Arc<dyn VmRepo>,
}

impl WorkerRegistry {
    pub fn new(worker_repo: Arc<dyn WorkerRepo>, vm_repo: Arc<dyn VmRepo>) -> Self {
        Self { worker_repo, vm_repo }
    }

    pub async fn register(&self, worker: Worker) -> Result<(), AethError> {
        self.worker_repo.create(&worker).await
    }

    pub async fn list(&self) -> Result<Vec<Worker>, AethError> {
        self.worker_repo.list().await
    }

    pub async fn vms_for(&self, worker_id: WorkerId) -> Result<Vec<Vm>, AethError> {
        self.vm_repo.list_by_worker(worker_id).await
    }

    /// Stops placement onto this worker without evicting its existing VMs.
    pub async fn drain(&self, worker_id: WorkerId) -> Result<(), AethError> {
        let mut worker = self.worker_repo.get(worker_id).await?;
        worker.status = WorkerStatus::Draining;
        self.worker_repo.update(&worker).await
    }

    pub async fn activate(&self, worker_id: WorkerId) -> Result<(), AethError> {
        let mut worker = self.worker_repo.get(worker_id).await?;
        worker.status = WorkerStatus::Active;
        self.worker_repo.update(&worker).await
    }
}

/// Read model for `aethctl status`: identity/health per worker, without
/// exposing the mutable `Worker` row itself. Takes an already-fetched
/// snapshot rather than re-querying, so it agrees with whatever stats were
/// computed from the same snapshot.
pub fn node_infos(workers: &[Worker], now: chrono::DateTime<chrono::Utc>) -> Vec<NodeInfo> {
    workers.iter().map(|w| NodeInfo::from_worker(w, now)).collect()
}

/// Read model for `aethctl status`: free capacity per worker.
pub fn node_stats(workers: &[Worker], now: chrono::DateTime<chrono::Utc>) -> Vec<NodeStats> {
    workers.iter().map(|w| NodeStats::from_worker(w, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemWorkerRepo {
        rows: Mutex<HashMap<WorkerId, Worker>>,
    }

    #[async_trait]
    impl WorkerRepo for MemWorkerRepo {
        async fn create(&self, worker: &Worker) -> Result<(), AethError> {
            self.rows.lock().await.insert(worker.id, worker.clone());
            Ok(())
        }
        async fn get(&self, id: WorkerId) -> Result<Worker, AethError> {
            self.rows.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("worker"))
        }
        async fn update(&self, worker: &Worker) -> Result<(), AethError> {
            self.rows.lock().await.insert(worker.id, worker.clone());
            Ok(())
        }
        async fn list(&self) -> Result<Vec<Worker>, AethError> {
            Ok(self.rows.lock().await.values().cloned().collect())
        }
        async fn reserve_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
            let mut rows = self.rows.lock().await;
            let worker = rows.get_mut(&id).ok_or_else(|| AethError::not_found("worker"))?;
            worker.reserve(cpu, memory_mb)
        }
        async fn release_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
            let mut rows = self.rows.lock().await;
            let worker = rows.get_mut(&id).ok_or_else(|| AethError::not_found("worker"))?;
            worker.release(cpu, memory_mb);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemVmRepo;

    #[async_trait]
    impl VmRepo for MemVmRepo {
        async fn create(&self, _vm: &Vm) -> Result<(), AethError> {
            Ok(())
        }
        async fn get(&self, _id: aeth_core::VmId) -> Result<Vm, AethError> {
            Err(AethError::not_found("vm"))
        }
        async fn get_by_name(&self, _name: &str) -> Result<Vm, AethError> {
            Err(AethError::not_found("vm"))
        }
        async fn update(&self, _vm: &Vm) -> Result<(), AethError> {
            Ok(())
        }
        async fn delete(&self, _id: aeth_core::VmId) -> Result<(), AethError> {
            Ok(())
        }
        async fn list(&self) -> Result<Vec<Vm>, AethError> {
            Ok(Vec::new())
        }
        async fn list_by_worker(&self, _worker_id: WorkerId) -> Result<Vec<Vm>, AethError> {
            Ok(Vec::new())
        }
    }

    fn worker() -> Worker {
        let now = chrono::Utc::now();
        Worker {
            id: WorkerId::new(),
            hostname: "node-1".into(),
            advertise_addr: "10.0.0.1:7000".into(),
            status: WorkerStatus::Active,
            zone: "us-east-1".into(),
            capabilities: HashSet::new(),
            cpu_cores: 4,
            used_cpu: 0,
            memory_mb: 8192,
            used_memory_mb: 0,
            disk_gb: 100,
            used_disk_gb: 0,
            vm_count: 0,
            max_vms: 8,
            last_seen: now,
            started_at: now,
        }
    }

    #[tokio::test]
    async fn draining_then_activating_a_worker_round_trips_its_status() {
        let registry = WorkerRegistry::new(Arc::new(MemWorkerRepo::default()), Arc::new(MemVmRepo));
        let w = worker();
        let id = w.id;
        registry.register(w).await.unwrap();

        registry.drain(id).await.unwrap();
        let drained = registry.list().await.unwrap();
        assert_eq!(drained[0].status, WorkerStatus::Draining);

        registry.activate(id).await.unwrap();
        let active = registry.list().await.unwrap();
        assert_eq!(active[0].status, WorkerStatus::Active);
    }
}
