//! The workspace engine: Create, on-demand Spawn, and prompt-execute
//! (§4.7), built on top of C1 repositories, C3's `FirecrackerDriver`, C4's
//! guest client, and C5's tool installer.

use crate::prep::{self, SecretResolver};
use aeth_core::audit::AuditEvent;
use aeth_core::environment::Environment;
use aeth_core::prep_step::PrepStep;
use aeth_core::prompt_task::{build_prompt_command, shell_escape_single_quoted, PromptTask, PromptTaskStatus};
use aeth_core::repo::{
    AuditRepo, EnvironmentRepo, PrepStepRepo, PromptTaskRepo, SecretRepo, VmRepo, WorkerRepo,
    WorkspaceRepo,
};
use aeth_core::vm::{Vm, VmStatus};
use aeth_core::workspace::{Workspace, WorkspaceStatus};
use aeth_core::{AethError, VmId, WorkspaceId};
use aeth_guest::protocol::ExecRequest;
use aeth_runtime::{CreateVmConfig, FirecrackerDriver};
use aeth_security::crypto;
use aeth_tools::ToolRequest;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// How long the engine waits after `StartVM` for the guest agent to come
/// up before driving any C4 traffic at it (§4.7: "wait >= 5s for agent").
const AGENT_WARMUP: Duration = Duration::from_secs(5);

pub struct WorkspaceDeps {
    pub workspace_repo: Arc<dyn WorkspaceRepo>,
    pub vm_repo: Arc<dyn VmRepo>,
    pub environment_repo: Arc<dyn EnvironmentRepo>,
    pub prep_step_repo: Arc<dyn PrepStepRepo>,
    pub secret_repo: Arc<dyn SecretRepo>,
    pub prompt_task_repo: Arc<dyn PromptTaskRepo>,
    pub worker_repo: Arc<dyn WorkerRepo>,
    pub audit_repo: Arc<dyn AuditRepo>,
    pub driver: Arc<FirecrackerDriver>,
    pub secret_key: Zeroizing<Vec<u8>>,
}

pub struct WorkspaceEngine {
    deps: WorkspaceDeps,
}

struct DecryptingResolver<'a> {
    deps: &'a WorkspaceDeps,
    workspace_id: WorkspaceId,
}

#[async_trait::async_trait]
impl SecretResolver for DecryptingResolver<'_> {
    async fn resolve(&self, secret_name: &str) -> Option<String> {
        let secret = self
            .deps
            .secret_repo
            .get_by_name(Some(self.workspace_id), secret_name)
            .await
            .ok()?;
        let plaintext = crypto::decrypt(&secret.ciphertext, &secret.nonce, &self.deps.secret_key).ok()?;
        let event = AuditEvent::new("workspace-engine", "secret.read", format!("workspace:{}", self.workspace_id));
        if let Err(e) = self.deps.audit_repo.record(&event).await {
            warn!(error = %e, secret_name, "failed to record audit event for secret read");
        }
        String::from_utf8(plaintext.to_vec()).ok()
    }
}

impl WorkspaceEngine {
    pub fn new(deps: WorkspaceDeps) -> Self {
        Self { deps }
    }

    /// `workspace:create` (§4.7 "Create"): persist in Creating, create and
    /// start a VM, install tools, run PrepSteps in order, land on Ready or
    /// Failed.
    pub async fn create(
        &self,
        mut workspace: Workspace,
        environment: &Environment,
        mut steps: Vec<PrepStep>,
    ) -> Result<Workspace, AethError> {
        self.deps.workspace_repo.create(&workspace).await?;

        let vm_id = VmId::new();
        let socket_path = self.deps.driver.socket_path(vm_id);
        let vm = Vm {
            id: vm_id,
            name: format!("ws-{}", workspace.id),
            orchestrator_tag: "firecracker".to_string(),
            status: VmStatus::Created,
            kernel_path: self.deps.driver.kernel_path().display().to_string(),
            rootfs_path: String::new(),
            socket_path: socket_path.display().to_string(),
            vcpu_count: environment.vcpus,
            memory_mb: environment.memory_mb,
            worker_id: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            metadata: Default::default(),
        };

        if let Err(e) = self.provision_and_start(&vm, environment).await {
            workspace.set_status(WorkspaceStatus::Failed)?;
            self.deps.workspace_repo.update(&workspace).await?;
            return Err(e);
        }

        let mut vm = vm;
        vm.rootfs_path = self.deps.driver.rootfs_path(vm.id).await.unwrap_or_default().display().to_string();
        vm.transition(VmStatus::Starting)?;
        vm.transition(VmStatus::Running)?;
        self.deps.vm_repo.create(&vm).await?;

        workspace.attach_vm(vm.id);
        workspace.set_status(WorkspaceStatus::Preparing)?;
        self.deps.workspace_repo.update(&workspace).await?;

        self.install_and_prepare(&vm, environment, &mut steps, &workspace).await;

        let final_status = if vm.status == VmStatus::Running {
            WorkspaceStatus::Ready
        } else {
            WorkspaceStatus::Failed
        };
        workspace.set_status(final_status)?;
        self.deps.workspace_repo.update(&workspace).await?;
        Ok(workspace)
    }

    /// On-demand spawn for `prompt:execute` when the workspace has no VM
    /// but does have an environment reference (§4.7 "On-demand spawn").
    pub async fn spawn_on_demand(
        &self,
        workspace: &mut Workspace,
        environment: &Environment,
    ) -> Result<(), AethError> {
        workspace.set_status(WorkspaceStatus::Spawning)?;
        self.deps.workspace_repo.update(workspace).await?;

        let vm_id = VmId::new();
        let socket_path = self.deps.driver.socket_path(vm_id);
        let vm = Vm {
            id: vm_id,
            name: format!("ws-{}", workspace.id),
            orchestrator_tag: "firecracker".to_string(),
            status: VmStatus::Created,
            kernel_path: self.deps.driver.kernel_path().display().to_string(),
            rootfs_path: String::new(),
            socket_path: socket_path.display().to_string(),
            vcpu_count: environment.vcpus,
            memory_mb: environment.memory_mb,
            worker_id: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            metadata: Default::default(),
        };

        self.provision_and_start(&vm, environment).await?;

        let mut vm = vm;
        vm.rootfs_path = self.deps.driver.rootfs_path(vm.id).await.unwrap_or_default().display().to_string();
        vm.transition(VmStatus::Starting)?;
        vm.transition(VmStatus::Running)?;
        self.deps.vm_repo.create(&vm).await?;

        let vsock_path = self.deps.driver.vsock_path(vm.id);
        let outcomes = aeth_tools::install_tools(
            &vsock_path,
            &environment
                .tools
                .iter()
                .map(|t| ToolRequest {
                    name: t.clone(),
                    version: "latest".to_string(),
                })
                .collect::<Vec<_>>(),
            environment.ai_assistant,
            aeth_tools::DEFAULT_INSTALL_TIMEOUT,
        )
        .await;
        for outcome in &outcomes {
            if !outcome.succeeded {
                warn!(tool = %outcome.tool, "on-demand tool install failed, continuing");
            }
        }

        self.write_mcp_settings(&vsock_path, environment).await;

        if let Some(repo_url) = &environment.git_repo_url {
            let clone_cmd = match &environment.git_branch {
                Some(branch) => format!("git clone -b {branch} {repo_url} {}", environment.working_dir),
                None => format!("git clone {repo_url} {}", environment.working_dir),
            };
            let _ = aeth_guest::exec(
                &vsock_path,
                ExecRequest {
                    cmd: "bash".to_string(),
                    args: vec!["-c".to_string(), clone_cmd],
                    env: vec![],
                },
            )
            .await;
        }

        for (key, value) in &environment.env_vars {
            let export_line = format!("export {key}='{}'", shell_escape_single_quoted(value));
            let quoted_line = shell_escape_single_quoted(&export_line);
            let export_cmd = format!("echo '{quoted_line}' >> ~/.bashrc");
            let _ = aeth_guest::exec(
                &vsock_path,
                ExecRequest {
                    cmd: "bash".to_string(),
                    args: vec!["-c".to_string(), export_cmd],
                    env: vec![],
                },
            )
            .await;
        }

        workspace.attach_vm(vm.id);
        workspace.set_status(WorkspaceStatus::Ready)?;
        self.deps.workspace_repo.update(workspace).await?;
        Ok(())
    }

    /// `prompt:execute` (§4.7 "Prompt execute"): runs the assistant CLI
    /// against the escaped prompt, persists the result, and updates the
    /// workspace's idle bookkeeping.
    pub async fn execute_prompt(
        &self,
        workspace: &mut Workspace,
        mut prompt_task: PromptTask,
    ) -> Result<PromptTask, AethError> {
        let vm_id = workspace
            .vm_id
            .ok_or_else(|| AethError::conflict("workspace has no VM to run a prompt against"))?;

        workspace.clear_idle();
        self.deps.workspace_repo.update(workspace).await?;

        let vsock_path = self.deps.driver.vsock_path(vm_id);
        let command = build_prompt_command(workspace.ai_assistant, &prompt_task.working_dir, &prompt_task.prompt);

        prompt_task.status = PromptTaskStatus::Running;
        self.deps.prompt_task_repo.update(&prompt_task).await?;

        let result = aeth_guest::exec(
            &vsock_path,
            ExecRequest {
                cmd: "bash".to_string(),
                args: vec!["-c".to_string(), command],
                env: vec![],
            },
        )
        .await;

        prompt_task.exit_code = Some(result.exit_code);
        prompt_task.stdout = Some(result.stdout);
        prompt_task.stderr = Some(result.stderr);
        prompt_task.status = if result.exit_code == 0 {
            PromptTaskStatus::Completed
        } else {
            PromptTaskStatus::Failed
        };
        prompt_task.completed_at = Some(chrono::Utc::now());
        self.deps.prompt_task_repo.update(&prompt_task).await?;

        workspace.mark_idle_now();
        self.deps.workspace_repo.update(workspace).await?;

        Ok(prompt_task)
    }

    async fn provision_and_start(&self, vm: &Vm, environment: &Environment) -> Result<(), AethError> {
        self.deps
            .driver
            .create_vm(
                vm.id,
                CreateVmConfig {
                    vcpu_count: environment.vcpus,
                    mem_size_mib: environment.memory_mb,
                    rootfs_path: None,
                },
            )
            .await?;
        self.deps.driver.start_vm(vm.id).await?;
        tokio::time::sleep(AGENT_WARMUP).await;
        Ok(())
    }

    async fn install_and_prepare(
        &self,
        vm: &Vm,
        environment: &Environment,
        steps: &mut [PrepStep],
        workspace: &Workspace,
    ) {
        let vsock_path = self.deps.driver.vsock_path(vm.id);
        let requested = environment
            .tools
            .iter()
            .map(|t| ToolRequest {
                name: t.clone(),
                version: "latest".to_string(),
            })
            .collect::<Vec<_>>();
        let outcomes = aeth_tools::install_tools(
            &vsock_path,
            &requested,
            environment.ai_assistant,
            aeth_tools::DEFAULT_INSTALL_TIMEOUT,
        )
        .await;
        for outcome in &outcomes {
            if !outcome.succeeded {
                warn!(tool = %outcome.tool, "tool install failed, continuing");
            }
        }

        let resolver = DecryptingResolver {
            deps: &self.deps,
            workspace_id: workspace.id,
        };
        prep::run_all(&vsock_path, steps, &resolver).await;
        for step in steps.iter() {
            if let Err(e) = self.deps.prep_step_repo.update(step).await {
                warn!(order = step.order, "failed to persist prep step result: {e}");
            }
        }
        info!(workspace_id = %workspace.id, vm_id = %vm.id, "workspace prep complete");
    }

    async fn write_mcp_settings(&self, vsock_path: &std::path::Path, environment: &Environment) {
        if environment.mcp_servers.is_empty() {
            return;
        }
        let settings = serde_json::json!({
            "mcpServers": environment.mcp_servers.iter().map(|s| (s.name().to_string(), s)).collect::<std::collections::HashMap<_, _>>(),
        });
        let Ok(payload) = serde_json::to_string(&settings) else {
            return;
        };
        let write_cmd = format!(
            "mkdir -p ~/.claude && cat > ~/.claude/settings.json <<'AETH_MCP_EOF'\n{payload}\nAETH_MCP_EOF"
        );
        let _ = aeth_guest::exec(
            vsock_path,
            ExecRequest {
                cmd: "bash".to_string(),
                args: vec!["-c".to_string(), write_cmd],
                env: vec![],
            },
        )
        .await;
    }
}
