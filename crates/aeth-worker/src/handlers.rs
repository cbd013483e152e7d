//! Task handlers (§4.6): unmarshal payload, invoke C3/C4/C5/C7, update C1
//! repositories, return a result map or a typed error for the queue to
//! classify and, if retryable, reschedule.

use crate::resources::ResourceAccountant;
use aeth_core::audit::AuditEvent;
use aeth_core::repo::{
    AuditRepo, EnvironmentRepo, ExecutionRepo, PrepStepRepo, PromptTaskRepo, VmRepo, WorkerRepo,
    WorkspaceRepo,
};
use aeth_core::task::Task;
use aeth_core::vm::{Vm, VmStatus};
use aeth_core::workspace::Workspace;
use aeth_core::{AethError, VmId, WorkerId, WorkspaceId};
use aeth_guest::protocol::ExecRequest;
use aeth_queue::queue::{HandlerResult, TaskHandler};
use aeth_runtime::{CreateVmConfig, FirecrackerDriver};
use aeth_security::Redactor;
use aeth_workspace::WorkspaceEngine;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Shared dependencies every handler is constructed with. Cloned cheaply
/// (everything behind an `Arc`) into each handler at worker startup.
#[derive(Clone)]
pub struct WorkerHandlerDeps {
    pub worker_id: WorkerId,
    pub vm_repo: Arc<dyn VmRepo>,
    pub execution_repo: Arc<dyn ExecutionRepo>,
    pub environment_repo: Arc<dyn EnvironmentRepo>,
    pub workspace_repo: Arc<dyn WorkspaceRepo>,
    pub prep_step_repo: Arc<dyn PrepStepRepo>,
    pub prompt_task_repo: Arc<dyn PromptTaskRepo>,
    pub worker_repo: Arc<dyn WorkerRepo>,
    pub audit_repo: Arc<dyn AuditRepo>,
    pub driver: Arc<FirecrackerDriver>,
    pub workspace_engine: Arc<WorkspaceEngine>,
}

impl WorkerHandlerDeps {
    fn accountant(&self) -> ResourceAccountant {
        ResourceAccountant::new(self.worker_repo.clone(), self.worker_id)
    }

    /// Best-effort: a failed audit write never fails the task it describes.
    async fn audit(&self, action: &str, target: impl Into<String>) {
        let event = AuditEvent::new(self.worker_id.to_string(), action, target);
        if let Err(e) = self.audit_repo.record(&event).await {
            tracing::warn!(error = %e, action, "failed to record audit event");
        }
    }
}

fn payload_of<T: for<'de> Deserialize<'de>>(task: &Task) -> Result<T, AethError> {
    serde_json::from_value(task.payload.clone())
        .map_err(|e| AethError::new(aeth_core::ErrorKind::Invalid, format!("bad task payload: {e}")))
}

#[derive(Deserialize)]
struct VmCreatePayload {
    name: String,
    vcpu_count: u32,
    mem_size_mib: u32,
}

pub struct VmCreateHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for VmCreateHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: VmCreatePayload = payload_of(task)?;
        let vm_id = VmId::new();

        self.deps
            .driver
            .create_vm(
                vm_id,
                CreateVmConfig {
                    vcpu_count: payload.vcpu_count,
                    mem_size_mib: payload.mem_size_mib,
                    rootfs_path: None,
                },
            )
            .await?;
        self.deps.driver.start_vm(vm_id).await?;
        let rootfs_path = self.deps.driver.rootfs_path(vm_id).await.unwrap_or_default();

        let mut vm = Vm {
            id: vm_id,
            name: payload.name,
            orchestrator_tag: "firecracker".into(),
            status: VmStatus::Created,
            kernel_path: self.deps.driver.kernel_path().display().to_string(),
            rootfs_path: rootfs_path.display().to_string(),
            socket_path: self.deps.driver.socket_path(vm_id).display().to_string(),
            vcpu_count: payload.vcpu_count,
            memory_mb: payload.mem_size_mib,
            worker_id: Some(self.deps.worker_id),
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            metadata: Default::default(),
        };
        vm.transition(VmStatus::Starting)?;
        vm.transition(VmStatus::Running)?;
        self.deps.vm_repo.create(&vm).await?;

        self.deps.accountant().reserve(payload.vcpu_count, payload.mem_size_mib).await?;
        self.deps.audit("vm.create", format!("vm:{vm_id}")).await;

        Ok(serde_json::json!({ "vm_id": vm_id.to_string() }))
    }
}

#[derive(Deserialize)]
struct VmExecutePayload {
    vm_id: VmId,
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    transient_secrets: Vec<String>,
}

pub struct VmExecuteHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for VmExecuteHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: VmExecutePayload = payload_of(task)?;
        let started_at = chrono::Utc::now();
        let vsock_path = self.deps.driver.vsock_path(payload.vm_id);

        let result = aeth_guest::exec(
            &vsock_path,
            ExecRequest {
                cmd: payload.cmd.clone(),
                args: payload.args.clone(),
                env: payload.env,
            },
        )
        .await;

        let redactor = Redactor::new(&payload.transient_secrets);
        let (stdout, stdout_redacted) = redactor.redact(&result.stdout);
        let (stderr, stderr_redacted) = redactor.redact(&result.stderr);

        let mut execution = aeth_core::execution::Execution::new(
            payload.vm_id,
            payload.cmd,
            payload.args,
            result.exit_code,
            stdout,
            stderr,
            started_at,
        );
        execution.secret_redacted = stdout_redacted || stderr_redacted;
        self.deps.execution_repo.create(&execution).await?;

        Ok(serde_json::json!({
            "execution_id": execution.id.to_string(),
            "exit_code": execution.exit_code,
        }))
    }
}

#[derive(Deserialize)]
struct VmDeletePayload {
    vm_id: VmId,
}

pub struct VmDeleteHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for VmDeleteHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: VmDeletePayload = payload_of(task)?;
        let vm = self.deps.vm_repo.get(payload.vm_id).await?;

        self.deps.driver.delete_vm(payload.vm_id).await?;
        self.deps.vm_repo.delete(payload.vm_id).await?;
        self.deps.accountant().release(vm.vcpu_count, vm.memory_mb).await?;
        self.deps.audit("vm.delete", format!("vm:{}", payload.vm_id)).await;

        Ok(serde_json::json!({ "vm_id": payload.vm_id.to_string() }))
    }
}

#[derive(Deserialize)]
struct WorkspaceCreatePayload {
    workspace: Workspace,
    environment_id: aeth_core::EnvironmentId,
    #[serde(default)]
    steps: Vec<aeth_core::prep_step::PrepStep>,
}

pub struct WorkspaceCreateHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for WorkspaceCreateHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: WorkspaceCreatePayload = payload_of(task)?;
        let environment = self.deps.environment_repo.get(payload.environment_id).await?;
        let workspace = self
            .deps
            .workspace_engine
            .create(payload.workspace, &environment, payload.steps)
            .await?;
        Ok(serde_json::json!({
            "workspace_id": workspace.id.to_string(),
            "status": workspace.status,
        }))
    }
}

#[derive(Deserialize)]
struct WorkspaceDeletePayload {
    workspace_id: WorkspaceId,
}

pub struct WorkspaceDeleteHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for WorkspaceDeleteHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: WorkspaceDeletePayload = payload_of(task)?;
        let workspace = self.deps.workspace_repo.get(payload.workspace_id).await?;

        if let Some(vm_id) = workspace.vm_id {
            let vm = self.deps.vm_repo.get(vm_id).await.ok();
            self.deps.driver.delete_vm(vm_id).await?;
            self.deps.vm_repo.delete(vm_id).await?;
            if let Some(vm) = vm {
                self.deps.accountant().release(vm.vcpu_count, vm.memory_mb).await?;
            }
        }
        self.deps.prep_step_repo.delete_for_workspace(payload.workspace_id).await?;
        self.deps.workspace_repo.delete(payload.workspace_id).await?;
        self.deps.audit("workspace.delete", format!("workspace:{}", payload.workspace_id)).await;

        Ok(serde_json::json!({ "workspace_id": payload.workspace_id.to_string() }))
    }
}

#[derive(Deserialize)]
struct PromptExecutePayload {
    workspace_id: WorkspaceId,
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
}

pub struct PromptExecuteHandler {
    pub deps: WorkerHandlerDeps,
}

#[async_trait]
impl TaskHandler for PromptExecuteHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let payload: PromptExecutePayload = payload_of(task)?;
        let mut workspace = self.deps.workspace_repo.get(payload.workspace_id).await?;

        if workspace.vm_id.is_none() {
            let environment_id = workspace
                .environment_id
                .ok_or_else(|| AethError::conflict("workspace has neither a VM nor an environment to spawn one from"))?;
            let environment = self.deps.environment_repo.get(environment_id).await?;
            self.deps.workspace_engine.spawn_on_demand(&mut workspace, &environment).await?;
        }

        let mut prompt_task = aeth_core::prompt_task::PromptTask::new(payload.workspace_id, payload.prompt, &workspace.working_dir);
        prompt_task.system_prompt = payload.system_prompt;
        self.deps.prompt_task_repo.create(&prompt_task).await?;

        let prompt_task = self.deps.workspace_engine.execute_prompt(&mut workspace, prompt_task).await?;

        Ok(serde_json::json!({
            "prompt_task_id": prompt_task.id.to_string(),
            "exit_code": prompt_task.exit_code,
            "status": prompt_task.status,
        }))
    }
}
