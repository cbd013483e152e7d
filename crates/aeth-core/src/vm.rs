//! The VM entity and its status state machine (§3, §4.3).

use crate::{AethError, VmId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Rejects transitions that aren't in the lifecycle graph of §4.3:
/// Created → Starting → Running → Stopping → Stopped, with Failed
/// reachable from Created, Starting, or Running.
pub fn validate_transition(from: VmStatus, to: VmStatus) -> Result<(), AethError> {
    use VmStatus::*;
    let allowed = matches!(
        (from, to),
        (Created, Starting)
            | (Starting, Running)
            | (Starting, Failed)
            | (Running, Stopping)
            | (Running, Failed)
            | (Stopping, Stopped)
            | (Stopping, Failed)
            | (Created, Failed)
    );
    if allowed {
        Ok(())
    } else {
        Err(AethError::conflict(format!(
            "invalid VM transition {from} -> {to}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub id: VmId,
    pub name: String,
    pub orchestrator_tag: String,
    pub status: VmStatus,
    pub kernel_path: String,
    pub rootfs_path: String,
    pub socket_path: String,
    pub vcpu_count: u32,
    pub memory_mb: u32,
    pub worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Vm {
    pub fn vsock_socket_path(&self) -> String {
        format!("{}.vsock", self.socket_path)
    }

    pub fn log_path(&self) -> String {
        format!("{}.log", self.socket_path)
    }

    pub fn transition(&mut self, to: VmStatus) -> Result<(), AethError> {
        validate_transition(self.status, to)?;
        match to {
            VmStatus::Running => self.started_at = Some(Utc::now()),
            VmStatus::Stopped => self.stopped_at = Some(Utc::now()),
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm {
            id: VmId::new(),
            name: "vm-a".into(),
            orchestrator_tag: "firecracker".into(),
            status: VmStatus::Created,
            kernel_path: "/var/lib/aetherium/vmlinux".into(),
            rootfs_path: "/var/lib/aetherium/rootfs-vm-a.ext4".into(),
            socket_path: "/var/run/aetherium/vm-a.sock".into(),
            vcpu_count: 1,
            memory_mb: 256,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn valid_lifecycle_transitions_succeed() {
        let mut v = vm();
        v.transition(VmStatus::Starting).unwrap();
        v.transition(VmStatus::Running).unwrap();
        assert!(v.started_at.is_some());
        v.transition(VmStatus::Stopping).unwrap();
        v.transition(VmStatus::Stopped).unwrap();
        assert!(v.stopped_at.is_some());
    }

    #[test]
    fn skipping_starting_is_rejected() {
        let mut v = vm();
        let err = v.transition(VmStatus::Running).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Conflict);
    }

    #[test]
    fn failed_is_reachable_from_starting_and_running() {
        assert!(validate_transition(VmStatus::Starting, VmStatus::Failed).is_ok());
        assert!(validate_transition(VmStatus::Running, VmStatus::Failed).is_ok());
        assert!(validate_transition(VmStatus::Stopped, VmStatus::Failed).is_err());
    }

    #[test]
    fn vm_json_roundtrip_preserves_metadata() {
        let mut v = vm();
        v.metadata.insert("workspace".into(), "abc".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: Vm = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.get("workspace"), Some(&"abc".to_string()));
    }
}
