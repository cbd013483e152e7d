use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub hostname: String,
    pub advertise_addr: String,
    #[serde(default = "default_zone")]
    pub zone: String,
    pub cpu_cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub max_vms: u32,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub kernel_path: String,
    pub rootfs_template_path: String,
    pub state_dir: String,
    #[serde(default = "default_reaper_interval")]
    pub reaper_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bridge_name")]
    pub bridge_name: String,
    #[serde(default = "default_bridge_ip")]
    pub bridge_ip: String,
    #[serde(default = "default_tap_prefix")]
    pub tap_prefix: String,
    #[serde(default)]
    pub enable_nat: bool,
    #[serde(default)]
    pub host_interface: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bridge_name: default_bridge_name(),
            bridge_ip: default_bridge_ip(),
            tap_prefix: default_tap_prefix(),
            enable_nat: false,
            host_interface: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// 64 hex chars (32 bytes) for AES-256-GCM. Falls back to a random
    /// dev-mode key with a warning when unset — never silent.
    #[serde(default)]
    pub encryption_key_hex: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_squid_binary")]
    pub squid_binary: String,
    #[serde(default = "default_squid_state_dir")]
    pub state_dir: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_max_connections() -> u32 {
    10
}
fn default_zone() -> String {
    "default".into()
}
fn default_heartbeat_interval() -> u64 {
    20
}
fn default_reaper_interval() -> u64 {
    60
}
fn default_squid_binary() -> String {
    "squid".into()
}
fn default_squid_state_dir() -> String {
    "/var/lib/aetherium/proxy".into()
}
fn default_bridge_name() -> String {
    "aeth0".into()
}
fn default_bridge_ip() -> String {
    "172.16.0.1".into()
}
fn default_tap_prefix() -> String {
    "aethtap".into()
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read daemon config: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).with_context(|| "failed to parse daemon config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.max_vms == 0 {
            anyhow::bail!("worker.max_vms must be at least 1");
        }
        if self.worker.cpu_cores == 0 || self.worker.memory_mb == 0 {
            anyhow::bail!("worker.cpu_cores and worker.memory_mb must be non-zero");
        }
        if self.proxy.enabled && self.proxy.allowed_domains.is_empty() {
            anyhow::bail!("proxy.enabled requires at least one proxy.allowed_domains entry");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[database]
url = "postgres://localhost/aetherium"

[worker]
hostname = "node-1"
advertise_addr = "10.0.0.1:7000"
cpu_cores = 8
memory_mb = 16384
disk_gb = 200
max_vms = 10

[runtime]
kernel_path = "/var/lib/aetherium/vmlinux"
rootfs_template_path = "/var/lib/aetherium/rootfs-base.ext4"
state_dir = "/var/lib/aetherium/vms"
"#
    }

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config = DaemonConfig::parse(minimal_toml()).unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.worker.zone, "default");
        assert_eq!(config.worker.heartbeat_interval_secs, 20);
        assert_eq!(config.runtime.reaper_check_interval_secs, 60);
        assert!(!config.proxy.enabled);
    }

    #[test]
    fn zero_max_vms_is_rejected() {
        let toml = minimal_toml().replace("max_vms = 10", "max_vms = 0");
        let err = DaemonConfig::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("max_vms"));
    }

    #[test]
    fn enabling_proxy_without_domains_is_rejected() {
        let toml = format!("{}\n[proxy]\nenabled = true\n", minimal_toml());
        let err = DaemonConfig::parse(&toml).unwrap_err();
        assert!(err.to_string().contains("allowed_domains"));
    }

    #[test]
    fn proxy_with_domains_parses() {
        let toml = format!(
            "{}\n[proxy]\nenabled = true\nallowed_domains = [\"github.com\", \"registry.npmjs.org\"]\n",
            minimal_toml()
        );
        let config = DaemonConfig::parse(&toml).unwrap();
        assert!(config.proxy.enabled);
        assert_eq!(config.proxy.allowed_domains.len(), 2);
    }
}
