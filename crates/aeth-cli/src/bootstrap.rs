//! Wires the daemon's dependency graph from a parsed config: storage
//! backend, runtime driver, handler registration, and background loops
//! (reaper, heartbeat, dispatch, optional egress proxy).

use crate::config::DaemonConfig;
use aeth_core::repo::{
    AuditRepo, EnvironmentRepo, ExecutionRepo, PrepStepRepo, PromptTaskRepo, SecretRepo, TaskRepo, VmRepo,
    WorkerRepo, WorkspaceRepo,
};
use aeth_core::task::{Task, TaskType};
use aeth_core::worker::{Worker, WorkerStatus};
use aeth_core::{TaskId, WorkerId};
use aeth_proxy::{ProxyAcl, SquidManager};
use aeth_queue::backend::{QueueBackend, QueueStats};
use aeth_queue::{InMemoryBackend, RedisBackend, TaskQueue};
use aeth_runtime::{FirecrackerDriver, NetworkManager, RootfsProvisioner};
use aeth_security::keystore::default_provider;
use aeth_storage::{
    create_pool, DbConfig, InMemoryStore, PgAuditRepo, PgEnvironmentRepo, PgExecutionRepo, PgPrepStepRepo,
    PgPromptTaskRepo, PgSecretRepo, PgTaskRepo, PgVmRepo, PgWorkerRepo, PgWorkspaceRepo,
};
use aeth_worker::{
    PromptExecuteHandler, VmCreateHandler, VmDeleteHandler, VmExecuteHandler, WorkerHandlerDeps,
    WorkspaceCreateHandler, WorkspaceDeleteHandler,
};
use aeth_workspace::{IdleReaper, WorkspaceDeps, WorkspaceEngine};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Picks between the in-memory backend (dev/test) and Redis (production)
/// behind one concrete type, since `TaskQueue<B>` needs `B: QueueBackend`
/// and trait objects can't satisfy that bound without an adapter.
enum AnyBackend {
    Memory(InMemoryBackend),
    Redis(RedisBackend),
}

#[async_trait]
impl QueueBackend for AnyBackend {
    async fn enqueue(&self, task: Task) -> Result<(), aeth_core::AethError> {
        match self {
            Self::Memory(b) => b.enqueue(task).await,
            Self::Redis(b) => b.enqueue(task).await,
        }
    }

    async fn claim_next(&self) -> Result<Option<Task>, aeth_core::AethError> {
        match self {
            Self::Memory(b) => b.claim_next().await,
            Self::Redis(b) => b.claim_next().await,
        }
    }

    async fn settle(&self, task: Task) -> Result<(), aeth_core::AethError> {
        match self {
            Self::Memory(b) => b.settle(task).await,
            Self::Redis(b) => b.settle(task).await,
        }
    }

    async fn get(&self, id: TaskId) -> Result<Task, aeth_core::AethError> {
        match self {
            Self::Memory(b) => b.get(id).await,
            Self::Redis(b) => b.get(id).await,
        }
    }

    async fn stats(&self) -> Result<QueueStats, aeth_core::AethError> {
        match self {
            Self::Memory(b) => b.stats().await,
            Self::Redis(b) => b.stats().await,
        }
    }
}

/// A fully wired daemon, ready to `run` until shutdown is signaled.
pub struct Daemon {
    queue: Arc<TaskQueue<AnyBackend>>,
    reaper: Arc<IdleReaper>,
    worker_repo: Arc<dyn WorkerRepo>,
    worker_id: WorkerId,
    heartbeat_interval: Duration,
    dispatch_concurrency: usize,
    handler_timeout: Duration,
    squid: Option<(Arc<SquidManager>, Arc<ProxyAcl>)>,
}

/// Repositories backing one node, regardless of which storage backend
/// produced them (§4.2: Postgres in production, in-memory for dev/test).
/// Shared with the `vm`/`workspace`/`status` commands, which need the same
/// repos without the rest of the daemon's runtime/network/proxy wiring.
pub(crate) struct Repos {
    pub environment: Arc<dyn EnvironmentRepo>,
    pub vm: Arc<dyn VmRepo>,
    pub task: Arc<dyn TaskRepo>,
    pub execution: Arc<dyn ExecutionRepo>,
    pub workspace: Arc<dyn WorkspaceRepo>,
    pub prep_step: Arc<dyn PrepStepRepo>,
    pub secret: Arc<dyn SecretRepo>,
    pub prompt_task: Arc<dyn PromptTaskRepo>,
    pub worker: Arc<dyn WorkerRepo>,
    pub audit: Arc<dyn AuditRepo>,
}

pub(crate) async fn build_repos(config: &DaemonConfig, in_memory: bool) -> Result<Repos> {
    if in_memory {
        warn!("running with the in-memory store: state does not survive a restart");
        let store = Arc::new(InMemoryStore::default());
        return Ok(Repos {
            environment: store.clone(),
            vm: store.clone(),
            task: store.clone(),
            execution: store.clone(),
            workspace: store.clone(),
            prep_step: store.clone(),
            secret: store.clone(),
            prompt_task: store.clone(),
            worker: store.clone(),
            audit: store,
        });
    }

    let pool = create_pool(DbConfig::from_url(&config.database.url).with_max_connections(config.database.max_connections))
        .await
        .context("connecting to postgres")?;
    Ok(Repos {
        environment: Arc::new(PgEnvironmentRepo::new(pool.clone())),
        vm: Arc::new(PgVmRepo::new(pool.clone())),
        task: Arc::new(PgTaskRepo::new(pool.clone())),
        execution: Arc::new(PgExecutionRepo::new(pool.clone())),
        workspace: Arc::new(PgWorkspaceRepo::new(pool.clone())),
        prep_step: Arc::new(PgPrepStepRepo::new(pool.clone())),
        secret: Arc::new(PgSecretRepo::new(pool.clone())),
        prompt_task: Arc::new(PgPromptTaskRepo::new(pool.clone())),
        worker: Arc::new(PgWorkerRepo::new(pool.clone())),
        audit: Arc::new(PgAuditRepo::new(pool)),
    })
}

impl Daemon {
    pub async fn bootstrap(config: &DaemonConfig, in_memory: bool, redis_url: Option<&str>) -> Result<Self> {
        let repos = build_repos(config, in_memory).await?;

        let network = Arc::new(NetworkManager::new(
            config.network.bridge_name.clone(),
            config.network.bridge_ip.clone(),
            config.network.tap_prefix.clone(),
            config.network.enable_nat,
            config.network.host_interface.clone(),
        ));
        network.ensure_bridge().await.context("configuring the network bridge")?;

        let rootfs = Arc::new(RootfsProvisioner::new(
            PathBuf::from(&config.runtime.rootfs_template_path),
            PathBuf::from(&config.runtime.state_dir).join("rootfs"),
        ));
        let driver = Arc::new(FirecrackerDriver::new(
            which::which("firecracker").unwrap_or_else(|_| PathBuf::from("firecracker")),
            PathBuf::from(&config.runtime.kernel_path),
            PathBuf::from(&config.runtime.state_dir).join("sockets"),
            network,
            rootfs,
        ));

        let worker_id = WorkerId::new();
        let now = chrono::Utc::now();
        let worker = Worker {
            id: worker_id,
            hostname: config.worker.hostname.clone(),
            advertise_addr: config.worker.advertise_addr.clone(),
            status: WorkerStatus::Active,
            zone: config.worker.zone.clone(),
            capabilities: Default::default(),
            cpu_cores: config.worker.cpu_cores,
            used_cpu: 0,
            memory_mb: config.worker.memory_mb,
            used_memory_mb: 0,
            disk_gb: config.worker.disk_gb,
            used_disk_gb: 0,
            vm_count: 0,
            max_vms: config.worker.max_vms,
            last_seen: now,
            started_at: now,
        };
        repos.worker.create(&worker).await.context("registering this worker")?;
        info!(%worker_id, hostname = %config.worker.hostname, "worker registered");

        let key = default_provider(config.security.encryption_key_hex.as_deref())
            .context("resolving the secrets encryption key")?
            .key();

        let workspace_engine = Arc::new(WorkspaceEngine::new(WorkspaceDeps {
            workspace_repo: repos.workspace.clone(),
            vm_repo: repos.vm.clone(),
            environment_repo: repos.environment.clone(),
            prep_step_repo: repos.prep_step.clone(),
            secret_repo: repos.secret.clone(),
            prompt_task_repo: repos.prompt_task.clone(),
            worker_repo: repos.worker.clone(),
            audit_repo: repos.audit.clone(),
            driver: driver.clone(),
            secret_key: key,
        }));

        let handler_deps = WorkerHandlerDeps {
            worker_id,
            vm_repo: repos.vm.clone(),
            execution_repo: repos.execution.clone(),
            environment_repo: repos.environment.clone(),
            workspace_repo: repos.workspace.clone(),
            prep_step_repo: repos.prep_step.clone(),
            prompt_task_repo: repos.prompt_task.clone(),
            worker_repo: repos.worker.clone(),
            audit_repo: repos.audit.clone(),
            driver: driver.clone(),
            workspace_engine: workspace_engine.clone(),
        };

        let backend = if let Some(url) = redis_url {
            AnyBackend::Redis(RedisBackend::connect(url).await.context("connecting to redis")?)
        } else {
            AnyBackend::Memory(InMemoryBackend::new())
        };
        let mut queue = TaskQueue::new(Arc::new(backend));
        register_handlers(&mut queue, handler_deps);
        let queue = Arc::new(queue);

        let reaper = Arc::new(
            IdleReaper::new(
                repos.workspace.clone(),
                repos.vm.clone(),
                repos.environment.clone(),
                repos.worker.clone(),
                driver.clone(),
            )
            .with_check_interval(Duration::from_secs(config.runtime.reaper_check_interval_secs)),
        );

        let squid = if config.proxy.enabled {
            let state_dir = PathBuf::from(&config.proxy.state_dir);
            let manager = Arc::new(SquidManager::new(
                config.proxy.squid_binary.clone(),
                state_dir.join("squid.conf"),
                state_dir.join("cache"),
                state_dir.join("access.log"),
            ));
            let acl = Arc::new(ProxyAcl::new());
            acl.set_global_domains(config.proxy.allowed_domains.clone()).await;
            manager.start(&acl).await.context("starting the egress proxy")?;
            Some((manager, acl))
        } else {
            None
        };

        Ok(Self {
            queue,
            reaper,
            worker_repo: repos.worker,
            worker_id,
            heartbeat_interval: Duration::from_secs(config.worker.heartbeat_interval_secs),
            dispatch_concurrency: (config.worker.max_vms.max(1) as usize).min(16),
            handler_timeout: Duration::from_secs(300),
            squid,
        })
    }

    /// Runs every background loop until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let reaper = self.reaper.clone();
        let reaper_task = tokio::spawn(async move { reaper.run().await });

        let heartbeat_task = tokio::spawn(aeth_worker::run_heartbeat_loop(
            self.worker_repo,
            self.worker_id,
            self.heartbeat_interval,
        ));

        self.queue.run(self.dispatch_concurrency, self.handler_timeout, shutdown).await;

        reaper_task.abort();
        heartbeat_task.abort();
        if let Some((squid, _)) = &self.squid {
            if squid.is_healthy().await {
                info!("leaving the egress proxy running for the next start");
            }
        }
    }
}

fn register_handlers(queue: &mut TaskQueue<AnyBackend>, deps: WorkerHandlerDeps) {
    queue.register_handler(TaskType::VmCreate, Arc::new(VmCreateHandler { deps: deps.clone() }));
    queue.register_handler(TaskType::VmExecute, Arc::new(VmExecuteHandler { deps: deps.clone() }));
    queue.register_handler(TaskType::VmDelete, Arc::new(VmDeleteHandler { deps: deps.clone() }));
    queue.register_handler(TaskType::WorkspaceCreate, Arc::new(WorkspaceCreateHandler { deps: deps.clone() }));
    queue.register_handler(TaskType::WorkspaceDelete, Arc::new(WorkspaceDeleteHandler { deps: deps.clone() }));
    queue.register_handler(TaskType::PromptExecute, Arc::new(PromptExecuteHandler { deps }));
}
