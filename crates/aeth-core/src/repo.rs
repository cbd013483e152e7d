//! Repository traits (§4.2). `aeth-storage` provides the Postgres
//! implementation; an in-memory implementation backs unit tests across the
//! rest of the workspace.

use crate::execution::Execution;
use crate::prep_step::PrepStep;
use crate::prompt_task::PromptTask;
use crate::secret::Secret;
use crate::task::Task;
use crate::vm::Vm;
use crate::worker::Worker;
use crate::workspace::Workspace;
use crate::{
    AethError, EnvironmentId, ExecutionId, PrepStepId, PromptTaskId, SecretId, TaskId, VmId,
    WorkerId, WorkspaceId,
};
use async_trait::async_trait;
use crate::environment::Environment;

#[async_trait]
pub trait VmRepo: Send + Sync {
    async fn create(&self, vm: &Vm) -> Result<(), AethError>;
    async fn get(&self, id: VmId) -> Result<Vm, AethError>;
    async fn get_by_name(&self, name: &str) -> Result<Vm, AethError>;
    async fn update(&self, vm: &Vm) -> Result<(), AethError>;
    async fn delete(&self, id: VmId) -> Result<(), AethError>;
    async fn list(&self) -> Result<Vec<Vm>, AethError>;
    async fn list_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Vm>, AethError>;
}

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), AethError>;
    async fn get(&self, id: TaskId) -> Result<Task, AethError>;
    async fn update(&self, task: &Task) -> Result<(), AethError>;
    /// `SELECT … FOR UPDATE SKIP LOCKED` semantics: atomically claims and
    /// returns the next due task, or `NotFound` if nothing is pending.
    async fn get_next_pending(&self, worker_id: WorkerId) -> Result<Task, AethError>;
    async fn list_by_status(&self, status: crate::task::TaskStatus) -> Result<Vec<Task>, AethError>;
}

#[async_trait]
pub trait ExecutionRepo: Send + Sync {
    async fn create(&self, execution: &Execution) -> Result<(), AethError>;
    async fn get(&self, id: ExecutionId) -> Result<Execution, AethError>;
    async fn list_by_vm(&self, vm_id: VmId) -> Result<Vec<Execution>, AethError>;
}

#[async_trait]
pub trait EnvironmentRepo: Send + Sync {
    async fn create(&self, env: &Environment) -> Result<(), AethError>;
    async fn get(&self, id: EnvironmentId) -> Result<Environment, AethError>;
    async fn get_by_name(&self, name: &str) -> Result<Environment, AethError>;
    async fn list(&self) -> Result<Vec<Environment>, AethError>;
}

#[async_trait]
pub trait WorkspaceRepo: Send + Sync {
    async fn create(&self, ws: &Workspace) -> Result<(), AethError>;
    async fn get(&self, id: WorkspaceId) -> Result<Workspace, AethError>;
    async fn update(&self, ws: &Workspace) -> Result<(), AethError>;
    /// Cascades to the workspace's PrepSteps, Secrets, and Sessions.
    async fn delete(&self, id: WorkspaceId) -> Result<(), AethError>;
    async fn list(&self) -> Result<Vec<Workspace>, AethError>;
    /// Workspaces where `vm_id` is non-null and `idle_since` is set,
    /// ordered ascending by `idle_since`.
    async fn list_idle_with_vms(&self) -> Result<Vec<Workspace>, AethError>;
}

#[async_trait]
pub trait PrepStepRepo: Send + Sync {
    async fn create(&self, step: &PrepStep) -> Result<(), AethError>;
    async fn update(&self, step: &PrepStep) -> Result<(), AethError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PrepStep>, AethError>;
    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError>;
}

#[async_trait]
pub trait SecretRepo: Send + Sync {
    async fn create(&self, secret: &Secret) -> Result<(), AethError>;
    async fn get(&self, id: SecretId) -> Result<Secret, AethError>;
    async fn get_by_name(&self, workspace_id: Option<WorkspaceId>, name: &str) -> Result<Secret, AethError>;
    async fn list_for_workspace(&self, workspace_id: Option<WorkspaceId>) -> Result<Vec<Secret>, AethError>;
    async fn delete(&self, id: SecretId) -> Result<(), AethError>;
    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError>;
}

#[async_trait]
pub trait PromptTaskRepo: Send + Sync {
    async fn create(&self, task: &PromptTask) -> Result<(), AethError>;
    async fn get(&self, id: PromptTaskId) -> Result<PromptTask, AethError>;
    async fn update(&self, task: &PromptTask) -> Result<(), AethError>;
    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PromptTask>, AethError>;
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    async fn create(&self, worker: &Worker) -> Result<(), AethError>;
    async fn get(&self, id: WorkerId) -> Result<Worker, AethError>;
    async fn update(&self, worker: &Worker) -> Result<(), AethError>;
    async fn list(&self) -> Result<Vec<Worker>, AethError>;

    /// Atomically checks and reserves `cpu`/`memory_mb` (and one VM slot)
    /// against the worker's cpu_cores/memory_mb/max_vms limits, as a single
    /// operation with no intervening read-modify-write window. Returns
    /// `Exhausted` if the worker has no free capacity.
    async fn reserve_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError>;

    /// Atomically releases `cpu`/`memory_mb` and one VM slot. Saturates at
    /// zero rather than erroring on over-release.
    async fn release_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn record(&self, event: &crate::audit::AuditEvent) -> Result<(), AethError>;
    /// Most recent events first.
    async fn list_for_target(&self, target: &str) -> Result<Vec<crate::audit::AuditEvent>, AethError>;
}
