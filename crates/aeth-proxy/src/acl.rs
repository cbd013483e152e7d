//! In-memory + on-disk domain allow-list (§3 "ProxyACL", §4.8). The global
//! domain list and per-VM `{vmID -> (vmName, vmIP, domains)}` map are the
//! only state the Squid config is derived from — regenerating the config
//! from the same ACL state twice must yield byte-identical output.

use aeth_core::VmId;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct VmAcl {
    pub vm_name: String,
    pub vm_ip: String,
    pub domains: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    global_domains: BTreeSet<String>,
    per_vm: HashMap<VmId, VmAcl>,
}

/// A VM's effective egress allow-list: the global domains plus its own.
#[derive(Debug, Clone)]
pub struct EffectiveAcl {
    pub vm_name: String,
    pub vm_ip: String,
    pub domains: BTreeSet<String>,
}

pub struct ProxyAcl {
    state: RwLock<State>,
}

impl ProxyAcl {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// `UpdateGlobalWhitelist(D)`. Idempotent: calling this twice with the
    /// same `domains` leaves the ACL state (and thus the rendered config)
    /// unchanged.
    pub async fn set_global_domains(&self, domains: impl IntoIterator<Item = String>) {
        let mut state = self.state.write().await;
        state.global_domains = domains.into_iter().collect();
    }

    pub async fn set_vm_acl(&self, vm_id: VmId, vm_name: String, vm_ip: String, domains: impl IntoIterator<Item = String>) {
        let mut state = self.state.write().await;
        state.per_vm.insert(
            vm_id,
            VmAcl {
                vm_name,
                vm_ip,
                domains: domains.into_iter().collect(),
            },
        );
    }

    pub async fn remove_vm(&self, vm_id: VmId) {
        self.state.write().await.per_vm.remove(&vm_id);
    }

    /// A deterministically-ordered snapshot for config rendering: global
    /// domains sorted, then per-VM entries sorted by IP.
    pub async fn effective_entries(&self) -> (BTreeSet<String>, Vec<EffectiveAcl>) {
        let state = self.state.read().await;
        let mut entries: Vec<EffectiveAcl> = state
            .per_vm
            .values()
            .map(|acl| EffectiveAcl {
                vm_name: acl.vm_name.clone(),
                vm_ip: acl.vm_ip.clone(),
                domains: acl.domains.union(&state.global_domains).cloned().collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.vm_ip.cmp(&b.vm_ip));
        (state.global_domains.clone(), entries)
    }
}

impl Default for ProxyAcl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_vms_effective_domains_are_the_union_of_global_and_its_own() {
        let acl = ProxyAcl::new();
        acl.set_global_domains(["github.com".to_string()]).await;
        acl.set_vm_acl(VmId::new(), "vm-a".into(), "172.16.0.2".into(), ["registry.npmjs.org".to_string()]).await;

        let (global, entries) = acl.effective_entries().await;
        assert_eq!(global.len(), 1);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].domains.contains("github.com"));
        assert!(entries[0].domains.contains("registry.npmjs.org"));
    }

    #[tokio::test]
    async fn setting_the_same_global_whitelist_twice_is_idempotent() {
        let acl = ProxyAcl::new();
        acl.set_global_domains(["github.com".to_string(), "example.com".to_string()]).await;
        let (first, _) = acl.effective_entries().await;
        acl.set_global_domains(["github.com".to_string(), "example.com".to_string()]).await;
        let (second, _) = acl.effective_entries().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn removing_a_vm_drops_it_from_the_snapshot() {
        let acl = ProxyAcl::new();
        let vm_id = VmId::new();
        acl.set_vm_acl(vm_id, "vm-a".into(), "172.16.0.2".into(), []).await;
        acl.remove_vm(vm_id).await;
        let (_, entries) = acl.effective_entries().await;
        assert!(entries.is_empty());
    }
}
