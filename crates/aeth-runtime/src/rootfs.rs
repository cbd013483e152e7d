//! Per-VM rootfs provisioning: a reflink copy-on-write clone of the shared
//! template image, falling back to a regular byte copy (with a logged
//! warning) on filesystems without reflink support. Follows
//! `vm::disk_manager`'s CoW-clone-with-fallback pattern.

use aeth_core::{AethError, VmId};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct RootfsProvisioner {
    template_path: PathBuf,
    instances_dir: PathBuf,
}

impl RootfsProvisioner {
    pub fn new(template_path: impl Into<PathBuf>, instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            instances_dir: instances_dir.into(),
        }
    }

    pub fn template_exists(&self) -> bool {
        self.template_path.is_file()
    }

    pub fn instance_path(&self, vm_id: VmId) -> PathBuf {
        self.instances_dir.join(format!("rootfs-vm-{vm_id}.ext4"))
    }

    /// Clones the template into a fresh per-VM rootfs. Tries `reflink` (a
    /// near-instant, space-sharing clone on btrfs/XFS/APFS-style copy-on-write
    /// filesystems) first; on `ENOTSUP`/`ENOSYS` falls back to a regular
    /// `std::fs::copy` and logs a warning, since the operation still
    /// succeeds, just slower and without space sharing.
    pub async fn provision(&self, vm_id: VmId) -> Result<PathBuf, AethError> {
        if !self.template_exists() {
            return Err(AethError::not_found(format!(
                "rootfs template not found at {}",
                self.template_path.display()
            )));
        }
        tokio::fs::create_dir_all(&self.instances_dir)
            .await
            .map_err(|e| AethError::internal(format!("creating instances dir: {e}")))?;

        let dest = self.instance_path(vm_id);
        let template = self.template_path.clone();
        let dest_for_blocking = dest.clone();

        tokio::task::spawn_blocking(move || clone_rootfs(&template, &dest_for_blocking))
            .await
            .map_err(|e| AethError::internal(format!("rootfs clone task panicked: {e}")))??;

        Ok(dest)
    }

    pub async fn destroy(&self, vm_id: VmId) {
        let path = self.instance_path(vm_id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(%vm_id, path = %path.display(), "failed to remove rootfs instance: {e}");
            }
        }
    }

    /// Rootfs instance files with no corresponding live VM — used by the
    /// health check's orphan count (§4.3).
    pub async fn orphan_count(&self, live_vm_ids: &[VmId]) -> Result<usize, AethError> {
        let mut entries = match tokio::fs::read_dir(&self.instances_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AethError::internal(format!("reading instances dir: {e}"))),
        };

        let mut orphans = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AethError::internal(format!("reading instances dir entry: {e}")))?
        {
            let stem = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
            let is_live = stem
                .as_deref()
                .and_then(|s| s.strip_prefix("rootfs-vm-"))
                .and_then(|s| s.parse::<uuid::Uuid>().ok())
                .map(|uuid| live_vm_ids.iter().any(|id| id.as_uuid() == &uuid))
                .unwrap_or(true); // unparseable name: not ours to judge as orphaned
            if !is_live {
                orphans += 1;
            }
        }
        Ok(orphans)
    }
}

fn clone_rootfs(template: &Path, dest: &Path) -> Result<(), AethError> {
    match reflink_copy::reflink(template, dest) {
        Ok(()) => {}
        Err(e) => {
            warn!(
                "reflink clone unavailable ({e}), falling back to a full copy for {}",
                dest.display()
            );
            std::fs::copy(template, dest)
                .map_err(|e| AethError::internal(format!("copying rootfs template: {e}")))?;
        }
    }

    let mut perms = std::fs::metadata(dest)
        .map_err(|e| AethError::internal(format!("statting cloned rootfs: {e}")))?
        .permissions();
    perms.set_mode(0o644);
    std::fs::set_permissions(dest, perms)
        .map_err(|e| AethError::internal(format!("chmod on cloned rootfs: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn provisioning_without_a_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = RootfsProvisioner::new(
            dir.path().join("missing.ext4"),
            dir.path().join("instances"),
        );
        let err = provisioner.provision(VmId::new()).await.unwrap_err();
        assert_eq!(err.kind, aeth_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn provisioning_clones_the_template_into_the_instances_dir() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.ext4");
        let mut f = std::fs::File::create(&template).unwrap();
        f.write_all(b"fake ext4 image bytes").unwrap();

        let provisioner = RootfsProvisioner::new(&template, dir.path().join("instances"));
        let vm_id = VmId::new();
        let cloned = provisioner.provision(vm_id).await.unwrap();
        assert!(cloned.exists());
        assert_eq!(std::fs::read(&cloned).unwrap(), b"fake ext4 image bytes");

        provisioner.destroy(vm_id).await;
        assert!(!cloned.exists());
    }

    #[tokio::test]
    async fn orphan_count_ignores_live_vms() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.ext4");
        std::fs::write(&template, b"x").unwrap();
        let provisioner = RootfsProvisioner::new(&template, dir.path().join("instances"));

        let live = VmId::new();
        let orphan = VmId::new();
        provisioner.provision(live).await.unwrap();
        provisioner.provision(orphan).await.unwrap();

        let count = provisioner.orphan_count(&[live]).await.unwrap();
        assert_eq!(count, 1);
    }
}
