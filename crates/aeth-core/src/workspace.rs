//! The user-visible workspace entity and its state machine (§3, §4.7).

use crate::environment::AiAssistant;
use crate::{AethError, EnvironmentId, VmId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Creating,
    Preparing,
    Spawning,
    Ready,
    Idle,
    Failed,
    Stopped,
}

impl WorkspaceStatus {
    /// §8 invariant: `(vm_ref = null) ⇔ (status ∈ {Creating, Idle, Failed, Stopped})`.
    pub fn requires_null_vm(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Idle | Self::Failed | Self::Stopped
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub description: Option<String>,
    pub vm_id: Option<VmId>,
    pub environment_id: Option<EnvironmentId>,
    pub status: WorkspaceStatus,
    pub ai_assistant: AiAssistant,
    pub working_dir: String,
    pub idle_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, environment_id: Option<EnvironmentId>) -> Self {
        Self {
            id: WorkspaceId::new(),
            name: name.into(),
            description: None,
            vm_id: None,
            environment_id,
            status: WorkspaceStatus::Creating,
            ai_assistant: AiAssistant::ClaudeCode,
            working_dir: "/root/workspace".into(),
            idle_since: None,
            created_at: Utc::now(),
            ready_at: None,
            stopped_at: None,
        }
    }

    /// Enforces the §8 invariant at the point of mutation rather than
    /// trusting callers to keep `vm_id` and `status` in sync by hand.
    pub fn set_status(&mut self, status: WorkspaceStatus) -> Result<(), AethError> {
        if status.requires_null_vm() && self.vm_id.is_some() {
            return Err(AethError::conflict(format!(
                "cannot set workspace {} to {status:?} while vm_id is set",
                self.id
            )));
        }
        if status == WorkspaceStatus::Ready && self.vm_id.is_none() {
            return Err(AethError::conflict(format!(
                "cannot set workspace {} to Ready without a vm_id",
                self.id
            )));
        }
        if status == WorkspaceStatus::Ready {
            self.ready_at = Some(Utc::now());
        }
        if status == WorkspaceStatus::Stopped {
            self.stopped_at = Some(Utc::now());
        }
        self.status = status;
        Ok(())
    }

    pub fn attach_vm(&mut self, vm_id: VmId) {
        self.vm_id = Some(vm_id);
        self.idle_since = None;
    }

    pub fn detach_vm(&mut self) {
        self.vm_id = None;
    }

    pub fn mark_idle_now(&mut self) {
        self.idle_since = Some(Utc::now());
    }

    /// Clears `idle_since` without touching `vm_id` — used on task dispatch
    /// (§4.7: "clear `idle_since` on dispatch").
    pub fn clear_idle(&mut self) {
        self.idle_since = None;
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.idle_since.map(|since| now - since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_a_vm_id() {
        let mut ws = Workspace::new("demo", None);
        let err = ws.set_status(WorkspaceStatus::Ready).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Conflict);
    }

    #[test]
    fn idle_requires_vm_id_to_be_cleared_first() {
        let mut ws = Workspace::new("demo", None);
        ws.attach_vm(VmId::new());
        ws.set_status(WorkspaceStatus::Ready).unwrap();
        let err = ws.set_status(WorkspaceStatus::Idle).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Conflict);

        ws.detach_vm();
        ws.set_status(WorkspaceStatus::Idle).unwrap();
        assert!(ws.vm_id.is_none());
    }

    #[test]
    fn attaching_a_vm_clears_idle_since() {
        let mut ws = Workspace::new("demo", None);
        ws.mark_idle_now();
        ws.attach_vm(VmId::new());
        assert!(ws.idle_since.is_none());
    }
}
