//! Idle reaper (§4.7 "Idle reaper"): a background loop that tears down
//! the VM behind a workspace once it has sat idle past its environment's
//! `idle_timeout_seconds`. Reaping a workspace never deletes the
//! workspace itself — only its VM and idle bookkeeping.

use aeth_core::repo::{EnvironmentRepo, VmRepo, WorkerRepo, WorkspaceRepo};
use aeth_core::workspace::WorkspaceStatus;
use aeth_runtime::FirecrackerDriver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// §4.7 default: reap check runs once a minute.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct IdleReaper {
    workspace_repo: Arc<dyn WorkspaceRepo>,
    vm_repo: Arc<dyn VmRepo>,
    environment_repo: Arc<dyn EnvironmentRepo>,
    worker_repo: Arc<dyn WorkerRepo>,
    driver: Arc<FirecrackerDriver>,
    check_interval: Duration,
}

impl IdleReaper {
    pub fn new(
        workspace_repo: Arc<dyn WorkspaceRepo>,
        vm_repo: Arc<dyn VmRepo>,
        environment_repo: Arc<dyn EnvironmentRepo>,
        worker_repo: Arc<dyn WorkerRepo>,
        driver: Arc<FirecrackerDriver>,
    ) -> Self {
        Self {
            workspace_repo,
            vm_repo,
            environment_repo,
            worker_repo,
            driver,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Runs until the process exits. Callers spawn this as its own task.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("idle reaper sweep failed: {e}");
            }
        }
    }

    /// One pass over idle workspaces. Exposed separately from `run` so
    /// tests can drive a single sweep deterministically.
    pub async fn sweep(&self) -> Result<(), aeth_core::AethError> {
        let now = chrono::Utc::now();
        for workspace in self.workspace_repo.list_idle_with_vms().await? {
            let Some(idle_for) = workspace.idle_for(now) else {
                continue;
            };
            let timeout_seconds = match workspace.environment_id {
                Some(env_id) => self
                    .environment_repo
                    .get(env_id)
                    .await
                    .map(|e| e.idle_timeout_seconds)
                    .unwrap_or(1800),
                None => 1800,
            };
            if idle_for.num_seconds() <= timeout_seconds as i64 {
                continue;
            }
            self.reap(workspace).await;
        }
        Ok(())
    }

    async fn reap(&self, mut workspace: aeth_core::workspace::Workspace) {
        let Some(vm_id) = workspace.vm_id else {
            return;
        };

        let vm = self.vm_repo.get(vm_id).await.ok();

        if let Err(e) = self.driver.delete_vm(vm_id).await {
            warn!(%vm_id, "idle reaper failed to delete VM: {e}");
            return;
        }
        if let Err(e) = self.vm_repo.delete(vm_id).await {
            warn!(%vm_id, "idle reaper failed to remove VM record: {e}");
        }

        if let Some(vm) = vm {
            if let Some(worker_id) = vm.worker_id {
                match self.worker_repo.get(worker_id).await {
                    Ok(mut worker) => {
                        worker.release(vm.vcpu_count, vm.memory_mb);
                        if let Err(e) = self.worker_repo.update(&worker).await {
                            warn!(%worker_id, "idle reaper failed to update worker resources: {e}");
                        }
                    }
                    Err(e) => warn!(%worker_id, "idle reaper could not load worker: {e}"),
                }
            }
        }

        workspace.detach_vm();
        if let Err(e) = workspace.set_status(WorkspaceStatus::Idle) {
            warn!(workspace_id = %workspace.id, "idle reaper could not set status: {e}");
            return;
        }
        workspace.idle_since = None;
        if let Err(e) = self.workspace_repo.update(&workspace).await {
            warn!(workspace_id = %workspace.id, "idle reaper failed to persist workspace: {e}");
            return;
        }
        info!(workspace_id = %workspace.id, %vm_id, "reaped idle workspace VM");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeth_core::environment::Environment;
    use aeth_core::vm::{Vm, VmStatus};
    use aeth_core::workspace::Workspace;
    use aeth_core::{AethError, EnvironmentId, VmId, WorkerId, WorkspaceId};
    use aeth_runtime::network::NetworkManager;
    use aeth_runtime::rootfs::RootfsProvisioner;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemWorkspaceRepo {
        rows: Mutex<HashMap<WorkspaceId, Workspace>>,
    }

    #[async_trait]
    impl WorkspaceRepo for MemWorkspaceRepo {
        async fn create(&self, ws: &Workspace) -> Result<(), AethError> {
            self.rows.lock().await.insert(ws.id, ws.clone());
            Ok(())
        }
        async fn get(&self, id: WorkspaceId) -> Result<Workspace, AethError> {
            self.rows
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| AethError::not_found("workspace"))
        }
        async fn update(&self, ws: &Workspace) -> Result<(), AethError> {
            self.rows.lock().await.insert(ws.id, ws.clone());
            Ok(())
        }
        async fn delete(&self, id: WorkspaceId) -> Result<(), AethError> {
            self.rows.lock().await.remove(&id);
            Ok(())
        }
        async fn list(&self) -> Result<Vec<Workspace>, AethError> {
            Ok(self.rows.lock().await.values().cloned().collect())
        }
        async fn list_idle_with_vms(&self) -> Result<Vec<Workspace>, AethError> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|w| w.vm_id.is_some() && w.idle_since.is_some())
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MemVmRepo {
        rows: Mutex<HashMap<VmId, Vm>>,
    }

    #[async_trait]
    impl VmRepo for MemVmRepo {
        async fn create(&self, vm: &Vm) -> Result<(), AethError> {
            self.rows.lock().await.insert(vm.id, vm.clone());
            Ok(())
        }
        async fn get(&self, id: VmId) -> Result<Vm, AethError> {
            self.rows
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| AethError::not_found("vm"))
        }
        async fn get_by_name(&self, name: &str) -> Result<Vm, AethError> {
            self.rows
                .lock()
                .await
                .values()
                .find(|v| v.name == name)
                .cloned()
                .ok_or_else(|| AethError::not_found("vm"))
        }
        async fn update(&self, vm: &Vm) -> Result<(), AethError> {
            self.rows.lock().await.insert(vm.id, vm.clone());
            Ok(())
        }
        async fn delete(&self, id: VmId) -> Result<(), AethError> {
            self.rows.lock().await.remove(&id);
            Ok(())
        }
        async fn list(&self) -> Result<Vec<Vm>, AethError> {
            Ok(self.rows.lock().await.values().cloned().collect())
        }
        async fn list_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Vm>, AethError> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|v| v.worker_id == Some(worker_id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MemEnvironmentRepo {
        rows: Mutex<HashMap<EnvironmentId, Environment>>,
    }

    #[async_trait]
    impl EnvironmentRepo for MemEnvironmentRepo {
        async fn create(&self, env: &Environment) -> Result<(), AethError> {
            self.rows.lock().await.insert(env.id, env.clone());
            Ok(())
        }
        async fn get(&self, id: EnvironmentId) -> Result<Environment, AethError> {
            self.rows
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| AethError::not_found("environment"))
        }
        async fn get_by_name(&self, name: &str) -> Result<Environment, AethError> {
            self.rows
                .lock()
                .await
                .values()
                .find(|e| e.name == name)
                .cloned()
                .ok_or_else(|| AethError::not_found("environment"))
        }
        async fn list(&self) -> Result<Vec<Environment>, AethError> {
            Ok(self.rows.lock().await.values().cloned().collect())
        }
    }

    #[derive(Default)]
    struct MemWorkerRepo {
        rows: Mutex<HashMap<WorkerId, aeth_core::worker::Worker>>,
    }

    #[async_trait]
    impl WorkerRepo for MemWorkerRepo {
        async fn create(&self, worker: &aeth_core::worker::Worker) -> Result<(), AethError> {
            self.rows.lock().await.insert(worker.id, worker.clone());
            Ok(())
        }
        async fn get(&self, id: WorkerId) -> Result<aeth_core::worker::Worker, AethError> {
            self.rows
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| AethError::not_found("worker"))
        }
        async fn update(&self, worker: &aeth_core::worker::Worker) -> Result<(), AethError> {
            self.rows.lock().await.insert(worker.id, worker.clone());
            Ok(())
        }
        async fn list(&self) -> Result<Vec<aeth_core::worker::Worker>, AethError> {
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

    fn driver(dir: &std::path::Path) -> FirecrackerDriver {
        let network = Arc::new(NetworkManager::new("aetherium0", "172.16.0.1", "tap", false, None));
        let rootfs = Arc::new(RootfsProvisioner::new(
            dir.join("template.ext4"),
            dir.join("instances"),
        ));
        FirecrackerDriver::new(
            dir.join("firecracker"),
            dir.join("vmlinux"),
            dir.join("sockets"),
            network,
            rootfs,
        )
    }

    #[tokio::test]
    async fn sweep_reaps_a_workspace_past_its_idle_timeout_and_leaves_the_workspace_row() {
        let dir = tempfile::tempdir().unwrap();
        let workspace_repo = Arc::new(MemWorkspaceRepo::default());
        let vm_repo = Arc::new(MemVmRepo::default());
        let environment_repo = Arc::new(MemEnvironmentRepo::default());
        let worker_repo = Arc::new(MemWorkerRepo::default());
        let fc_driver = Arc::new(driver(dir.path()));

        let mut env = Environment::default();
        env.idle_timeout_seconds = 1;
        environment_repo.create(&env).await.unwrap();

        let vm_id = VmId::new();
        let mut vm = Vm {
            id: vm_id,
            name: "ws-vm".into(),
            orchestrator_tag: "firecracker".into(),
            status: VmStatus::Created,
            kernel_path: String::new(),
            rootfs_path: String::new(),
            socket_path: "/tmp/ws-vm".into(),
            vcpu_count: 1,
            memory_mb: 256,
            worker_id: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            metadata: HashMap::new(),
        };
        vm.transition(VmStatus::Starting).unwrap();
        vm.transition(VmStatus::Running).unwrap();
        vm_repo.create(&vm).await.unwrap();

        let mut ws = Workspace::new("demo", Some(env.id));
        ws.attach_vm(vm_id);
        ws.set_status(WorkspaceStatus::Ready).unwrap();
        ws.mark_idle_now();
        ws.idle_since = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        let ws_id = ws.id;
        workspace_repo.create(&ws).await.unwrap();

        let reaper = IdleReaper::new(
            workspace_repo.clone(),
            vm_repo.clone(),
            environment_repo.clone(),
            worker_repo.clone(),
            fc_driver,
        );
        reaper.sweep().await.unwrap();

        let reaped = workspace_repo.get(ws_id).await.unwrap();
        assert!(reaped.vm_id.is_none());
        assert_eq!(reaped.status, WorkspaceStatus::Idle);
        assert!(reaped.idle_since.is_none());
        assert!(vm_repo.get(vm_id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_leaves_workspaces_that_have_not_reached_their_idle_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let workspace_repo = Arc::new(MemWorkspaceRepo::default());
        let vm_repo = Arc::new(MemVmRepo::default());
        let environment_repo = Arc::new(MemEnvironmentRepo::default());
        let worker_repo = Arc::new(MemWorkerRepo::default());
        let fc_driver = Arc::new(driver(dir.path()));

        let mut env = Environment::default();
        env.idle_timeout_seconds = 3600;
        environment_repo.create(&env).await.unwrap();

        let vm_id = VmId::new();
        let mut ws = Workspace::new("demo", Some(env.id));
        ws.attach_vm(vm_id);
        ws.set_status(WorkspaceStatus::Ready).unwrap();
        ws.mark_idle_now();
        let ws_id = ws.id;
        workspace_repo.create(&ws).await.unwrap();

        let reaper = IdleReaper::new(workspace_repo.clone(), vm_repo, environment_repo, worker_repo, fc_driver);
        reaper.sweep().await.unwrap();

        let still_there = workspace_repo.get(ws_id).await.unwrap();
        assert!(still_there.vm_id.is_some());
        assert_eq!(still_there.status, WorkspaceStatus::Ready);
    }
}
