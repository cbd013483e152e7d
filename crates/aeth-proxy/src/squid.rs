//! Managed Squid process (§4.8): renders ACL state into a config file,
//! reconfigures the running process, and reports health via signal-0.
//! Uses `tera::Tera` for one-shot template rendering and follows
//! `aeth-runtime::network`'s idempotent shell-command pattern for process
//! control.

use crate::acl::ProxyAcl;
use aeth_core::AethError;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::process::Command;
use tracing::{info, warn};

const SQUID_TEMPLATE: &str = r#"
http_port 3128
visible_hostname aetherium-proxy
cache_dir ufs {{ cache_dir }} 100 16 256
access_log {{ access_log_path }} squid

acl all_domains dstdomain {% for d in global_domains %}{{ d }} {% endfor %}

{% for vm in vms %}
acl vm_{{ loop.index }} src {{ vm.vm_ip }}/32
acl vm_{{ loop.index }}_domains dstdomain {% for d in vm.domains %}{{ d }} {% endfor %}
http_access allow vm_{{ loop.index }} vm_{{ loop.index }}_domains
{% endfor %}

http_access deny all
"#;

pub struct SquidManager {
    squid_binary: PathBuf,
    config_path: PathBuf,
    cache_dir: PathBuf,
    access_log_path: PathBuf,
    pid: AtomicU32,
}

impl SquidManager {
    pub fn new(
        squid_binary: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        access_log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            squid_binary: squid_binary.into(),
            config_path: config_path.into(),
            cache_dir: cache_dir.into(),
            access_log_path: access_log_path.into(),
            pid: AtomicU32::new(0),
        }
    }

    pub fn access_log_path(&self) -> &std::path::Path {
        &self.access_log_path
    }

    /// Renders the current ACL state to `config_path`. Pure function of the
    /// ACL snapshot — same input, same bytes.
    pub async fn render_config(&self, acl: &ProxyAcl) -> Result<(), AethError> {
        let (global_domains, vms) = acl.effective_entries().await;

        let mut tera = tera::Tera::default();
        tera.add_raw_template("squid.conf", SQUID_TEMPLATE)
            .map_err(|e| AethError::internal(format!("invalid squid template: {e}")))?;

        let mut ctx = tera::Context::new();
        ctx.insert("cache_dir", &self.cache_dir.display().to_string());
        ctx.insert("access_log_path", &self.access_log_path.display().to_string());
        ctx.insert("global_domains", &global_domains);
        ctx.insert(
            "vms",
            &vms.into_iter()
                .map(|e| {
                    serde_json::json!({
                        "vm_name": e.vm_name,
                        "vm_ip": e.vm_ip,
                        "domains": e.domains,
                    })
                })
                .collect::<Vec<_>>(),
        );

        let rendered = tera
            .render("squid.conf", &ctx)
            .map_err(|e| AethError::internal(format!("failed to render squid config: {e}")))?;

        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AethError::internal(format!("creating squid config dir: {e}")))?;
        }
        tokio::fs::write(&self.config_path, rendered)
            .await
            .map_err(|e| AethError::internal(format!("writing squid config: {e}")))?;
        Ok(())
    }

    /// First start: initializes the cache dir (`squid -z`) then launches the
    /// daemon. Subsequent starts should go through `reconfigure` instead.
    pub async fn start(&self, acl: &ProxyAcl) -> Result<(), AethError> {
        self.render_config(acl).await?;

        run(&self.squid_binary, &["-z", "-f", &self.config_path.display().to_string()]).await?;

        let child = Command::new(&self.squid_binary)
            .args(["-N", "-f", &self.config_path.display().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| AethError::internal(format!("spawning squid: {e}")))?;
        if let Some(pid) = child.id() {
            self.pid.store(pid, Ordering::SeqCst);
        }
        info!("squid started");
        Ok(())
    }

    /// Re-renders the config from the current ACL state and asks the
    /// running process to pick it up without dropping connections.
    pub async fn reconfigure(&self, acl: &ProxyAcl) -> Result<(), AethError> {
        self.render_config(acl).await?;
        run(&self.squid_binary, &["-k", "reconfigure", "-f", &self.config_path.display().to_string()]).await
    }

    /// Signal-0 liveness check: does the tracked pid still exist.
    pub async fn is_healthy(&self) -> bool {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return false;
        }
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

async fn run(binary: &std::path::Path, args: &[&str]) -> Result<(), AethError> {
    let output = Command::new(binary)
        .args(args)
        .output()
        .await
        .map_err(|e| AethError::unavailable(format!("running {}: {e}", binary.display())))?;
    if !output.status.success() {
        warn!(
            binary = %binary.display(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "squid command exited non-zero"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_config_is_deterministic_across_identical_acl_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SquidManager::new(
            "squid",
            dir.path().join("squid.conf"),
            dir.path().join("cache"),
            dir.path().join("access.log"),
        );
        let acl = ProxyAcl::new();
        acl.set_global_domains(["github.com".to_string()]).await;

        manager.render_config(&acl).await.unwrap();
        let first = tokio::fs::read_to_string(dir.path().join("squid.conf")).await.unwrap();
        manager.render_config(&acl).await.unwrap();
        let second = tokio::fs::read_to_string(dir.path().join("squid.conf")).await.unwrap();

        assert_eq!(first, second);
        assert!(first.contains("github.com"));
    }

    #[tokio::test]
    async fn a_manager_with_no_tracked_pid_reports_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SquidManager::new(
            "squid",
            dir.path().join("squid.conf"),
            dir.path().join("cache"),
            dir.path().join("access.log"),
        );
        assert!(!manager.is_healthy().await);
    }
}
