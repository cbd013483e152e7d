//! Runs the merged tool set's `mise install` commands against a VM's guest
//! agent (§4.5). Installation failures are logged and skipped — a broken
//! tool install never fails VM creation, since the VM is still usable
//! without it.

use crate::catalog::{merge_tool_sets, ToolRequest};
use aeth_core::environment::AiAssistant;
use aeth_guest::protocol::ExecRequest;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub tool: String,
    pub version: String,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Installs `requested` (merged with the default set and the workspace's
/// assistant tool) into the VM behind `vsock_uds_path`, one `mise install`
/// invocation per tool so a single failure doesn't block the rest.
pub async fn install_tools(
    vsock_uds_path: &Path,
    requested: &[ToolRequest],
    assistant: AiAssistant,
    timeout: Duration,
) -> Vec<InstallOutcome> {
    let tools = merge_tool_sets(requested, assistant);
    let mut outcomes = Vec::with_capacity(tools.len());

    let deadline = tokio::time::Instant::now() + timeout;
    for tool in tools {
        if tokio::time::Instant::now() >= deadline {
            warn!(tool = %tool.name, "skipping install: overall tool-install timeout elapsed");
            outcomes.push(InstallOutcome {
                tool: tool.name,
                version: tool.version,
                succeeded: false,
                detail: Some("overall install timeout elapsed".to_string()),
            });
            continue;
        }

        let request = ExecRequest {
            cmd: "mise".to_string(),
            args: vec![
                "install".to_string(),
                "-y".to_string(),
                format!("{}@{}", tool.name, tool.version),
            ],
            env: vec![],
        };
        let result = aeth_guest::exec(vsock_uds_path, request).await;
        if result.exit_code != 0 {
            warn!(
                tool = %tool.name,
                version = %tool.version,
                exit_code = result.exit_code,
                "tool install failed, continuing without it"
            );
        }
        outcomes.push(InstallOutcome {
            tool: tool.name,
            version: tool.version,
            succeeded: result.exit_code == 0,
            detail: if result.stderr.is_empty() {
                None
            } else {
                Some(result.stderr)
            },
        });
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn installing_against_an_unreachable_vm_reports_every_tool_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.vsock");
        let outcomes = install_tools(
            &missing,
            &[ToolRequest {
                name: "node".into(),
                version: "20".into(),
            }],
            AiAssistant::ClaudeCode,
            Duration::from_secs(1),
        )
        .await;

        assert!(outcomes.iter().any(|o| o.tool == "node"));
        assert!(outcomes.iter().all(|o| !o.succeeded));
    }
}
