//! Executes a workspace's PrepSteps in ascending order against its VM
//! (§4.7). A step failure is recorded on that step and logged; it never
//! aborts the remaining steps — the workspace only goes Failed overall if
//! its VM never reached Running.

use aeth_core::prep_step::{PrepStep, PrepStepKind, PrepStepStatus};
use aeth_core::prompt_task::shell_escape_single_quoted;
use aeth_guest::protocol::ExecRequest;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tracing::warn;

/// Resolves an `env_var` step's value: either the literal `value`, or a
/// named secret's decrypted plaintext supplied by the caller.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, secret_name: &str) -> Option<String>;
}

/// Builds the guest command that appends `export {key}='{value}'` to
/// `~/.bashrc`, single-quoting `value` twice over: once so the `.bashrc`
/// line itself is safe for a later shell to source, again so the whole
/// line is a safe single-quoted argument to `echo`.
fn env_var_append_command(key: &str, value: &str) -> String {
    let export_line = format!("export {key}='{}'", shell_escape_single_quoted(value));
    let quoted_line = shell_escape_single_quoted(&export_line);
    format!("echo '{quoted_line}' >> ~/.bashrc")
}

pub async fn run_all(
    vsock_uds_path: &Path,
    steps: &mut [PrepStep],
    secrets: &dyn SecretResolver,
) {
    for step in steps.iter_mut().filter(|s| s.status != PrepStepStatus::Completed) {
        run_one(vsock_uds_path, step, secrets).await;
    }
}

async fn run_one(vsock_uds_path: &Path, step: &mut PrepStep, secrets: &dyn SecretResolver) {
    if step.status == PrepStepStatus::Completed {
        return;
    }
    step.status = PrepStepStatus::Running;
    let start = Instant::now();

    let command = match &step.kind {
        PrepStepKind::GitClone { url, branch, dest } => match branch {
            Some(b) => format!("git clone -b {b} {url} {dest}"),
            None => format!("git clone {url} {dest}"),
        },
        PrepStepKind::Script { content, .. } => content.clone(),
        PrepStepKind::EnvVar {
            key,
            value,
            secret_name,
            ..
        } => {
            let resolved = match (value, secret_name) {
                (Some(v), _) => Some(v.clone()),
                (None, Some(name)) => secrets.resolve(name).await,
                (None, None) => None,
            };
            let Some(resolved) = resolved else {
                step.status = PrepStepStatus::Failed;
                step.stderr = Some(format!("env_var step for {key} has neither value nor a resolvable secret"));
                step.duration_ms = Some(start.elapsed().as_millis() as i64);
                return;
            };
            env_var_append_command(key, &resolved)
        }
    };

    let request = ExecRequest {
        cmd: "bash".to_string(),
        args: vec!["-c".to_string(), command],
        env: vec![],
    };
    let result = aeth_guest::exec(vsock_uds_path, request).await;

    step.exit_code = Some(result.exit_code);
    step.stdout = Some(result.stdout);
    step.stderr = Some(result.stderr);
    step.duration_ms = Some(start.elapsed().as_millis() as i64);
    step.status = if result.exit_code == 0 {
        PrepStepStatus::Completed
    } else {
        warn!(workspace_id = %step.workspace_id, order = step.order, "prep step failed, continuing");
        PrepStepStatus::Failed
    };
}
