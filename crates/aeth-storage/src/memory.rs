//! A single in-process store implementing all ten repositories. Used by
//! `aethctl serve --in-memory` for single-node dev runs without a Postgres
//! instance, and directly by unit tests elsewhere in the workspace.

use aeth_core::environment::Environment;
use aeth_core::execution::Execution;
use aeth_core::prep_step::PrepStep;
use aeth_core::prompt_task::PromptTask;
use aeth_core::repo::{
    AuditRepo, EnvironmentRepo, ExecutionRepo, PrepStepRepo, PromptTaskRepo, SecretRepo, TaskRepo,
    VmRepo, WorkerRepo, WorkspaceRepo,
};
use aeth_core::secret::Secret;
use aeth_core::task::{Task, TaskStatus};
use aeth_core::vm::Vm;
use aeth_core::worker::Worker;
use aeth_core::workspace::Workspace;
use aeth_core::{
    AethError, EnvironmentId, ExecutionId, PrepStepId, PromptTaskId, SecretId, TaskId, VmId,
    WorkerId, WorkspaceId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStore {
    vms: Mutex<HashMap<VmId, Vm>>,
    tasks: Mutex<HashMap<TaskId, Task>>,
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    environments: Mutex<HashMap<EnvironmentId, Environment>>,
    workspaces: Mutex<HashMap<WorkspaceId, Workspace>>,
    prep_steps: Mutex<HashMap<PrepStepId, PrepStep>>,
    secrets: Mutex<HashMap<SecretId, Secret>>,
    prompt_tasks: Mutex<HashMap<PromptTaskId, PromptTask>>,
    workers: Mutex<HashMap<WorkerId, Worker>>,
    audit_events: Mutex<Vec<aeth_core::audit::AuditEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VmRepo for InMemoryStore {
    async fn create(&self, vm: &Vm) -> Result<(), AethError> {
        self.vms.lock().await.insert(vm.id, vm.clone());
        Ok(())
    }

    async fn get(&self, id: VmId) -> Result<Vm, AethError> {
        self.vms.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("vm"))
    }

    async fn get_by_name(&self, name: &str) -> Result<Vm, AethError> {
        self.vms
            .lock()
            .await
            .values()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| AethError::not_found("vm"))
    }

    async fn update(&self, vm: &Vm) -> Result<(), AethError> {
        self.vms.lock().await.insert(vm.id, vm.clone());
        Ok(())
    }

    async fn delete(&self, id: VmId) -> Result<(), AethError> {
        self.vms.lock().await.remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Vm>, AethError> {
        Ok(self.vms.lock().await.values().cloned().collect())
    }

    async fn list_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Vm>, AethError> {
        Ok(self
            .vms
            .lock()
            .await
            .values()
            .filter(|v| v.worker_id == Some(worker_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskRepo for InMemoryStore {
    async fn create(&self, task: &Task) -> Result<(), AethError> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, AethError> {
        self.tasks.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("task"))
    }

    async fn update(&self, task: &Task) -> Result<(), AethError> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_next_pending(&self, worker_id: WorkerId) -> Result<Task, AethError> {
        let now = chrono::Utc::now();
        let mut tasks = self.tasks.lock().await;
        let id = tasks
            .values()
            .filter(|t| t.is_due(now))
            .min_by_key(|t| (-t.priority, t.scheduled_at))
            .map(|t| t.id)
            .ok_or_else(|| AethError::not_found("no pending task"))?;
        let task = tasks.get_mut(&id).expect("id just found above");
        task.claim(worker_id);
        Ok(task.clone())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, AethError> {
        Ok(self.tasks.lock().await.values().filter(|t| t.status == status).cloned().collect())
    }
}

#[async_trait]
impl ExecutionRepo for InMemoryStore {
    async fn create(&self, execution: &Execution) -> Result<(), AethError> {
        self.executions.lock().await.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, AethError> {
        self.executions.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("execution"))
    }

    async fn list_by_vm(&self, vm_id: VmId) -> Result<Vec<Execution>, AethError> {
        Ok(self.executions.lock().await.values().filter(|e| e.vm_id == vm_id).cloned().collect())
    }
}

#[async_trait]
impl EnvironmentRepo for InMemoryStore {
    async fn create(&self, env: &Environment) -> Result<(), AethError> {
        self.environments.lock().await.insert(env.id, env.clone());
        Ok(())
    }

    async fn get(&self, id: EnvironmentId) -> Result<Environment, AethError> {
        self.environments.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("environment"))
    }

    async fn get_by_name(&self, name: &str) -> Result<Environment, AethError> {
        self.environments
            .lock()
            .await
            .values()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| AethError::not_found("environment"))
    }

    async fn list(&self) -> Result<Vec<Environment>, AethError> {
        Ok(self.environments.lock().await.values().cloned().collect())
    }
}

#[async_trait]
impl WorkspaceRepo for InMemoryStore {
    async fn create(&self, ws: &Workspace) -> Result<(), AethError> {
        self.workspaces.lock().await.insert(ws.id, ws.clone());
        Ok(())
    }

    async fn get(&self, id: WorkspaceId) -> Result<Workspace, AethError> {
        self.workspaces.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("workspace"))
    }

    async fn update(&self, ws: &Workspace) -> Result<(), AethError> {
        self.workspaces.lock().await.insert(ws.id, ws.clone());
        Ok(())
    }

    async fn delete(&self, id: WorkspaceId) -> Result<(), AethError> {
        self.workspaces.lock().await.remove(&id);
        self.prep_steps.lock().await.retain(|_, s| s.workspace_id != id);
        self.secrets.lock().await.retain(|_, s| s.workspace_id != Some(id));
        self.prompt_tasks.lock().await.retain(|_, t| t.workspace_id != id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Workspace>, AethError> {
        Ok(self.workspaces.lock().await.values().cloned().collect())
    }

    async fn list_idle_with_vms(&self) -> Result<Vec<Workspace>, AethError> {
        let mut idle: Vec<Workspace> = self
            .workspaces
            .lock()
            .await
            .values()
            .filter(|w| w.vm_id.is_some() && w.idle_since.is_some())
            .cloned()
            .collect();
        idle.sort_by_key(|w| w.idle_since);
        Ok(idle)
    }
}

#[async_trait]
impl PrepStepRepo for InMemoryStore {
    async fn create(&self, step: &PrepStep) -> Result<(), AethError> {
        self.prep_steps.lock().await.insert(step.id, step.clone());
        Ok(())
    }

    async fn update(&self, step: &PrepStep) -> Result<(), AethError> {
        self.prep_steps.lock().await.insert(step.id, step.clone());
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PrepStep>, AethError> {
        let mut steps: Vec<PrepStep> = self
            .prep_steps
            .lock()
            .await
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }

    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError> {
        self.prep_steps.lock().await.retain(|_, s| s.workspace_id != workspace_id);
        Ok(())
    }
}

#[async_trait]
impl SecretRepo for InMemoryStore {
    async fn create(&self, secret: &Secret) -> Result<(), AethError> {
        self.secrets.lock().await.insert(secret.id, secret.clone());
        Ok(())
    }

    async fn get(&self, id: SecretId) -> Result<Secret, AethError> {
        self.secrets.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("secret"))
    }

    async fn get_by_name(&self, workspace_id: Option<WorkspaceId>, name: &str) -> Result<Secret, AethError> {
        self.secrets
            .lock()
            .await
            .values()
            .find(|s| s.workspace_id == workspace_id && s.name == name)
            .cloned()
            .ok_or_else(|| AethError::not_found("secret"))
    }

    async fn list_for_workspace(&self, workspace_id: Option<WorkspaceId>) -> Result<Vec<Secret>, AethError> {
        Ok(self
            .secrets
            .lock()
            .await
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: SecretId) -> Result<(), AethError> {
        self.secrets.lock().await.remove(&id);
        Ok(())
    }

    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError> {
        self.secrets.lock().await.retain(|_, s| s.workspace_id != Some(workspace_id));
        Ok(())
    }
}

#[async_trait]
impl PromptTaskRepo for InMemoryStore {
    async fn create(&self, task: &PromptTask) -> Result<(), AethError> {
        self.prompt_tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: PromptTaskId) -> Result<PromptTask, AethError> {
        self.prompt_tasks.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("prompt task"))
    }

    async fn update(&self, task: &PromptTask) -> Result<(), AethError> {
        self.prompt_tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<PromptTask>, AethError> {
        let mut tasks: Vec<PromptTask> = self
            .prompt_tasks
            .lock()
            .await
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

#[async_trait]
impl WorkerRepo for InMemoryStore {
    async fn create(&self, worker: &Worker) -> Result<(), AethError> {
        self.workers.lock().await.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get(&self, id: WorkerId) -> Result<Worker, AethError> {
        self.workers.lock().await.get(&id).cloned().ok_or_else(|| AethError::not_found("worker"))
    }

    async fn update(&self, worker: &Worker) -> Result<(), AethError> {
        self.workers.lock().await.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Worker>, AethError> {
        Ok(self.workers.lock().await.values().cloned().collect())
    }

    async fn reserve_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(&id).ok_or_else(|| AethError::not_found("worker"))?;
        worker.reserve(cpu, memory_mb)
    }

    async fn release_capacity(&self, id: WorkerId, cpu: u32, memory_mb: u32) -> Result<(), AethError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(&id).ok_or_else(|| AethError::not_found("worker"))?;
        worker.release(cpu, memory_mb);
        Ok(())
    }
}

#[async_trait]
impl AuditRepo for InMemoryStore {
    async fn record(&self, event: &aeth_core::audit::AuditEvent) -> Result<(), AethError> {
        self.audit_events.lock().await.push(event.clone());
        Ok(())
    }

    async fn list_for_target(&self, target: &str) -> Result<Vec<aeth_core::audit::AuditEvent>, AethError> {
        let mut events: Vec<_> = self
            .audit_events
            .lock()
            .await
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.at));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_next_pending_claims_the_highest_priority_due_task() {
        let store = InMemoryStore::new();
        let low = Task::new(aeth_core::task::TaskType::VmExecute, serde_json::json!({}), 1);
        let mut high = Task::new(aeth_core::task::TaskType::VmExecute, serde_json::json!({}), 1);
        high.priority = 10;
        TaskRepo::create(&store, &low).await.unwrap();
        TaskRepo::create(&store, &high).await.unwrap();

        let claimed = store.get_next_pending(WorkerId::new()).await.unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn deleting_a_workspace_cascades_to_its_prep_steps_and_secrets() {
        let store = InMemoryStore::new();
        let ws = Workspace::new("demo", None);
        WorkspaceRepo::create(&store, &ws).await.unwrap();
        let step = PrepStep::new(
            ws.id,
            0,
            aeth_core::prep_step::PrepStepKind::Script {
                interpreter: "bash".into(),
                content: "true".into(),
            },
        );
        PrepStepRepo::create(&store, &step).await.unwrap();

        WorkspaceRepo::delete(&store, ws.id).await.unwrap();
        assert!(PrepStepRepo::list_for_workspace(&store, ws.id).await.unwrap().is_empty());
        assert!(WorkspaceRepo::get(&store, ws.id).await.is_err());
    }
}
