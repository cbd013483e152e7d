//! The process-wide network manager (§4.3 "Networking"): one Linux bridge,
//! an IP allocator over `.2–.254`, and a TAP device registry keyed by VM id.
//! Follows `vm::bridge`'s idempotent shell-based setup, generalized from a
//! per-tenant bridge to Aetherium's single shared bridge.

use aeth_core::{AethError, VmId};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::warn;

const FIRST_OCTET: u8 = 2;
const LAST_OCTET: u8 = 254;

pub struct TapLease {
    pub tap_name: String,
    pub ip: String,
    pub mac: String,
}

struct State {
    allocated: HashMap<VmId, u8>,
    taps: HashMap<VmId, String>,
}

pub struct NetworkManager {
    bridge_name: String,
    bridge_ip: String,
    subnet_prefix: String, // e.g. "172.16.0"
    tap_prefix: String,
    enable_nat: bool,
    host_interface: Option<String>,
    state: Mutex<State>,
}

impl NetworkManager {
    pub fn new(
        bridge_name: impl Into<String>,
        bridge_ip: impl Into<String>,
        tap_prefix: impl Into<String>,
        enable_nat: bool,
        host_interface: Option<String>,
    ) -> Self {
        let bridge_ip = bridge_ip.into();
        let subnet_prefix = bridge_ip.rsplit_once('.').map(|(p, _)| p.to_string()).unwrap_or_else(|| "172.16.0".into());
        Self {
            bridge_name: bridge_name.into(),
            bridge_ip,
            subnet_prefix,
            tap_prefix: tap_prefix.into(),
            enable_nat,
            host_interface,
            state: Mutex::new(State {
                allocated: HashMap::new(),
                taps: HashMap::new(),
            }),
        }
    }

    /// Idempotent: creates the bridge, assigns the gateway IP, enables
    /// forwarding and NAT if configured. Tolerates external pre-configuration
    /// (every step checks-then-acts).
    pub async fn ensure_bridge(&self) -> Result<(), AethError> {
        run_shell(&format!(
            r#"
            echo 1 > /proc/sys/net/ipv4/ip_forward 2>/dev/null || true
            if ! ip link show {bridge} >/dev/null 2>&1; then
                ip link add {bridge} type bridge
                ip addr add {gw}/24 dev {bridge}
                ip link set {bridge} up
            fi
            "#,
            bridge = self.bridge_name,
            gw = self.bridge_ip,
        ))
        .await?;

        if self.enable_nat {
            let iface = self.resolve_host_interface().await?;
            run_shell(&format!(
                r#"
                iptables -t nat -C POSTROUTING -s {subnet}.0/24 -o {iface} -j MASQUERADE 2>/dev/null || \
                    iptables -t nat -A POSTROUTING -s {subnet}.0/24 -o {iface} -j MASQUERADE
                iptables -C FORWARD -i {bridge} -o {iface} -j ACCEPT 2>/dev/null || \
                    iptables -A FORWARD -i {bridge} -o {iface} -j ACCEPT
                iptables -C FORWARD -i {iface} -o {bridge} -m state --state RELATED,ESTABLISHED -j ACCEPT 2>/dev/null || \
                    iptables -A FORWARD -i {iface} -o {bridge} -m state --state RELATED,ESTABLISHED -j ACCEPT
                "#,
                subnet = self.subnet_prefix,
                bridge = self.bridge_name,
                iface = iface,
            ))
            .await?;
        }
        Ok(())
    }

    async fn resolve_host_interface(&self) -> Result<String, AethError> {
        if let Some(iface) = &self.host_interface {
            return Ok(iface.clone());
        }
        let out = run_shell_stdout("ip route show default | awk '{print $5}' | head -n1").await?;
        let iface = out.trim().to_string();
        if iface.is_empty() {
            return Err(AethError::unavailable("could not auto-detect default host interface"));
        }
        Ok(iface)
    }

    /// Allocates the next free `.2–.254` address and a TAP device name
    /// derived from the first 8 hex chars of the VM id, truncated to 15
    /// bytes (the kernel's interface-name limit).
    pub fn allocate(&self, vm_id: VmId) -> Result<TapLease, AethError> {
        let mut state = self.state.lock().unwrap();
        let used: std::collections::HashSet<u8> = state.allocated.values().copied().collect();
        let octet = (FIRST_OCTET..=LAST_OCTET)
            .find(|o| !used.contains(o))
            .ok_or_else(|| AethError::exhausted("no free IPs in the aetherium0 subnet"))?;

        state.allocated.insert(vm_id, octet);
        let short_id = vm_id.to_string().replace('-', "");
        let tap_name = format!("{}{}", self.tap_prefix, &short_id[..8.min(short_id.len())])
            .chars()
            .take(15)
            .collect::<String>();
        state.taps.insert(vm_id, tap_name.clone());

        Ok(TapLease {
            tap_name,
            ip: format!("{}.{}", self.subnet_prefix, octet),
            mac: mac_for_vm(vm_id),
        })
    }

    pub fn release(&self, vm_id: VmId) {
        let mut state = self.state.lock().unwrap();
        state.allocated.remove(&vm_id);
        state.taps.remove(&vm_id);
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap().allocated.len()
    }

    /// Creates the TAP device and attaches it to the bridge. Idempotent.
    pub async fn create_tap(&self, lease: &TapLease) -> Result<(), AethError> {
        run_shell(&format!(
            r#"
            if ! ip link show {tap} >/dev/null 2>&1; then
                ip tuntap add {tap} mode tap
                ip link set {tap} master {bridge}
                ip link set {tap} up
            fi
            "#,
            tap = lease.tap_name,
            bridge = self.bridge_name,
        ))
        .await
    }

    pub async fn destroy_tap(&self, vm_id: VmId) {
        let tap_name = {
            let state = self.state.lock().unwrap();
            state.taps.get(&vm_id).cloned()
        };
        if let Some(tap) = tap_name {
            if let Err(e) = run_shell(&format!("ip link del {tap} 2>/dev/null || true")).await {
                warn!(%vm_id, "failed to remove TAP device: {e}");
            }
        }
        self.release(vm_id);
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }
}

fn mac_for_vm(vm_id: VmId) -> String {
    let bytes = vm_id.as_uuid().as_bytes();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2]
    )
}

async fn run_shell(script: &str) -> Result<(), AethError> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|e| AethError::unavailable(format!("spawning shell: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(AethError::unavailable(format!(
            "network setup command exited with {status}"
        )))
    }
}

async fn run_shell_stdout(script: &str) -> Result<String, AethError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(script)
        .output()
        .await
        .map_err(|e| AethError::unavailable(format!("spawning shell: {e}")))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> NetworkManager {
        NetworkManager::new("aetherium0", "172.16.0.1", "tap", true, Some("eth0".into()))
    }

    #[test]
    fn allocating_253_addresses_succeeds_and_the_254th_is_exhausted() {
        let mgr = manager();
        for _ in 0..253 {
            mgr.allocate(VmId::new()).unwrap();
        }
        let err = mgr.allocate(VmId::new()).unwrap_err();
        assert_eq!(err.kind, aeth_core::ErrorKind::Exhausted);
    }

    #[test]
    fn releasing_one_lease_makes_the_next_allocation_succeed() {
        let mgr = manager();
        let mut last_id = VmId::new();
        for _ in 0..253 {
            last_id = VmId::new();
            mgr.allocate(last_id).unwrap();
        }
        assert!(mgr.allocate(VmId::new()).is_err());
        mgr.release(last_id);
        assert!(mgr.allocate(VmId::new()).is_ok());
    }

    #[test]
    fn tap_names_are_truncated_to_fifteen_bytes() {
        let mgr = manager();
        let lease = mgr.allocate(VmId::new()).unwrap();
        assert!(lease.tap_name.len() <= 15);
        assert!(lease.tap_name.starts_with("tap"));
    }

    #[test]
    fn mac_addresses_use_the_fixed_locally_administered_prefix() {
        let mac = mac_for_vm(VmId::new());
        assert!(mac.starts_with("52:54:00:"));
    }
}
