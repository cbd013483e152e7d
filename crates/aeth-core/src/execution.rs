//! Immutable record of one command run inside a VM (§3, §4.4).

use crate::{ExecutionId, VmId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub vm_id: VmId,
    pub command: String,
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub secret_redacted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl Execution {
    pub fn new(
        vm_id: VmId,
        command: String,
        args: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);
        Self {
            id: ExecutionId::new(),
            vm_id,
            command,
            args,
            exit_code,
            stdout,
            stderr,
            secret_redacted: false,
            started_at,
            completed_at,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_derived_from_start_and_completion() {
        let start = Utc::now() - chrono::Duration::milliseconds(250);
        let exec = Execution::new(
            VmId::new(),
            "echo".into(),
            vec!["hello".into()],
            0,
            "hello\n".into(),
            String::new(),
            start,
        );
        assert!(exec.duration_ms >= 250);
    }
}
