//! Orchestrator readiness (§4.3 "Health"): green iff the firecracker binary
//! resolves, the kernel and rootfs template exist, `/dev/kvm` is
//! readable/writable, and orphaned rootfs count stays at or below 10.

use crate::rootfs::RootfsProvisioner;
use aeth_core::VmId;
use serde::Serialize;
use std::path::{Path, PathBuf};

const MAX_ORPHAN_ROOTFS: usize = 10;
const SEARCH_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin"];

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorHealth {
    pub firecracker_resolvable: bool,
    pub kernel_exists: bool,
    pub rootfs_template_exists: bool,
    pub kvm_accessible: bool,
    pub orphaned_rootfs_count: usize,
}

impl OrchestratorHealth {
    pub fn is_healthy(&self) -> bool {
        self.firecracker_resolvable
            && self.kernel_exists
            && self.rootfs_template_exists
            && self.kvm_accessible
            && self.orphaned_rootfs_count <= MAX_ORPHAN_ROOTFS
    }

    pub async fn check(
        kernel_path: &Path,
        rootfs: &RootfsProvisioner,
        live_vm_ids: &[VmId],
    ) -> Self {
        let orphaned_rootfs_count = rootfs.orphan_count(live_vm_ids).await.unwrap_or(usize::MAX);
        Self {
            firecracker_resolvable: resolve_firecracker().is_some(),
            kernel_exists: kernel_path.is_file(),
            rootfs_template_exists: rootfs.template_exists(),
            kvm_accessible: kvm_accessible(),
            orphaned_rootfs_count,
        }
    }
}

fn resolve_firecracker() -> Option<PathBuf> {
    if let Ok(path) = which::which("firecracker") {
        return Some(path);
    }
    SEARCH_DIRS
        .iter()
        .map(|dir| Path::new(dir).join("firecracker"))
        .find(|candidate| candidate.is_file())
}

fn kvm_accessible() -> bool {
    let path = Path::new("/dev/kvm");
    // A direct read/write open is the most faithful check: existence alone
    // doesn't tell us whether the orchestrator's uid has access.
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_every_check_to_pass() {
        let healthy = OrchestratorHealth {
            firecracker_resolvable: true,
            kernel_exists: true,
            rootfs_template_exists: true,
            kvm_accessible: true,
            orphaned_rootfs_count: 3,
        };
        assert!(healthy.is_healthy());

        let mut unhealthy = healthy.clone();
        unhealthy.kvm_accessible = false;
        assert!(!unhealthy.is_healthy());
    }

    #[test]
    fn orphan_count_at_the_threshold_is_still_healthy() {
        let health = OrchestratorHealth {
            firecracker_resolvable: true,
            kernel_exists: true,
            rootfs_template_exists: true,
            kvm_accessible: true,
            orphaned_rootfs_count: 10,
        };
        assert!(health.is_healthy());
    }

    #[test]
    fn orphan_count_over_the_threshold_is_unhealthy() {
        let health = OrchestratorHealth {
            firecracker_resolvable: true,
            kernel_exists: true,
            rootfs_template_exists: true,
            kvm_accessible: true,
            orphaned_rootfs_count: 11,
        };
        assert!(!health.is_healthy());
    }
}
