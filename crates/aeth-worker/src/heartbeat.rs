//! Periodic worker heartbeat (§4.6, §4.9): `UpdateLastSeen` plus a resource
//! snapshot, so the cluster registry's 60s health window (§4.9) keeps
//! tracking a live worker.

use aeth_core::repo::WorkerRepo;
use aeth_core::WorkerId;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Runs until the process exits. Callers spawn this as its own task
/// alongside the dispatch loop.
pub async fn run_heartbeat_loop(worker_repo: Arc<dyn WorkerRepo>, worker_id: WorkerId, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match worker_repo.get(worker_id).await {
            Ok(mut worker) => {
                worker.heartbeat();
                if let Err(e) = worker_repo.update(&worker).await {
                    warn!(%worker_id, "heartbeat update failed: {e}");
                }
            }
            Err(e) => warn!(%worker_id, "heartbeat could not load worker row: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeth_core::worker::{Worker, WorkerStatus};
    use aeth_core::AethError;
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

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loop_refreshes_last_seen_on_each_tick() {
        let repo = Arc::new(MemWorkerRepo::default());
        let now = chrono::Utc::now();
        let stale = now - chrono::Duration::seconds(120);
        let w = Worker {
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
            last_seen: stale,
            started_at: stale,
        };
        let id = w.id;
        repo.create(&w).await.unwrap();

        let loop_repo = repo.clone();
        tokio::spawn(run_heartbeat_loop(loop_repo, id, Duration::from_millis(10)));
        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;

        let refreshed = repo.get(id).await.unwrap();
        assert!(refreshed.is_healthy(chrono::Utc::now()));
    }
}
