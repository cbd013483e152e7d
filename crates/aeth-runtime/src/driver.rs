//! `FirecrackerDriver`: the VM orchestrator's entry point (§4.3). Ties
//! together per-VM rootfs provisioning, TAP/IP allocation, and the
//! Firecracker process + API client into `CreateVM`/`StartVM`/`StopVM`/
//! `DeleteVM`, keyed by VM id and idempotent on that key.

use crate::network::NetworkManager;
use crate::process::{ApiClient, FirecrackerProcess};
use crate::rootfs::RootfsProvisioner;
use aeth_core::{AethError, VmId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct CreateVmConfig {
    pub vcpu_count: u32,
    pub mem_size_mib: u32,
    pub rootfs_path: Option<PathBuf>,
}

struct MachineHandle {
    process: FirecrackerProcess,
    api: ApiClient,
    tap_name: String,
    rootfs_path: PathBuf,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct FirecrackerDriver {
    firecracker_binary: PathBuf,
    kernel_path: PathBuf,
    sockets_dir: PathBuf,
    network: Arc<NetworkManager>,
    rootfs: Arc<RootfsProvisioner>,
    machines: Mutex<HashMap<VmId, MachineHandle>>,
}

impl FirecrackerDriver {
    pub fn new(
        firecracker_binary: impl Into<PathBuf>,
        kernel_path: impl Into<PathBuf>,
        sockets_dir: impl Into<PathBuf>,
        network: Arc<NetworkManager>,
        rootfs: Arc<RootfsProvisioner>,
    ) -> Self {
        Self {
            firecracker_binary: firecracker_binary.into(),
            kernel_path: kernel_path.into(),
            sockets_dir: sockets_dir.into(),
            network,
            rootfs,
            machines: Mutex::new(HashMap::new()),
        }
    }

    pub fn socket_path(&self, vm_id: VmId) -> PathBuf {
        self.sockets_dir.join(format!("{vm_id}.sock"))
    }

    fn log_path(&self, vm_id: VmId) -> PathBuf {
        self.sockets_dir.join(format!("{vm_id}.log"))
    }

    /// Path to the VM's vsock UDS proxy, used by C4 to reach the guest.
    pub fn vsock_path(&self, vm_id: VmId) -> PathBuf {
        let mut path = self.socket_path(vm_id).into_os_string();
        path.push(".vsock");
        PathBuf::from(path)
    }

    pub fn kernel_path(&self) -> &Path {
        &self.kernel_path
    }

    pub async fn live_vm_ids(&self) -> Vec<VmId> {
        self.machines.lock().await.keys().copied().collect()
    }

    /// The rootfs file this VM is actually running against, as computed by
    /// `create_vm` (provisioned fresh, or the caller-supplied path).
    pub async fn rootfs_path(&self, vm_id: VmId) -> Option<PathBuf> {
        self.machines.lock().await.get(&vm_id).map(|h| h.rootfs_path.clone())
    }

    /// Steps 1-5 of §4.3 CreateVM. The returned Firecracker process is
    /// detached (`kill_on_drop(false)`) so it outlives this call — a
    /// deliberately background-scoped process, not subject to the queue's
    /// cooperative cancellation.
    pub async fn create_vm(&self, vm_id: VmId, config: CreateVmConfig) -> Result<(), AethError> {
        if !self.kernel_path.is_file() {
            return Err(AethError::not_found(format!(
                "kernel image not found at {}",
                self.kernel_path.display()
            )));
        }

        let rootfs_path = match config.rootfs_path {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => self.rootfs.provision(vm_id).await?,
        };

        let lease = self.network.allocate(vm_id)?;
        self.network.create_tap(&lease).await?;

        tokio::fs::create_dir_all(&self.sockets_dir)
            .await
            .map_err(|e| AethError::internal(format!("creating sockets dir: {e}")))?;
        let socket_path = self.socket_path(vm_id);
        let log_path = self.log_path(vm_id);

        let process = match FirecrackerProcess::spawn(&self.firecracker_binary, vm_id, &socket_path, &log_path).await {
            Ok(process) => process,
            Err(e) => {
                self.network.destroy_tap(vm_id).await;
                return Err(e);
            }
        };

        let api = ApiClient::new(&socket_path);
        if let Err(e) = self
            .configure_machine(vm_id, &api, &config, &rootfs_path, &lease)
            .await
        {
            process.sigkill()?;
            process.cleanup().await;
            self.network.destroy_tap(vm_id).await;
            return Err(e);
        }

        let mut machines = self.machines.lock().await;
        machines.insert(
            vm_id,
            MachineHandle {
                process,
                api,
                tap_name: lease.tap_name,
                rootfs_path,
                started_at: None,
            },
        );
        info!(%vm_id, ip = %lease.ip, "VM created");
        Ok(())
    }

    async fn configure_machine(
        &self,
        vm_id: VmId,
        api: &ApiClient,
        config: &CreateVmConfig,
        rootfs_path: &Path,
        lease: &crate::network::TapLease,
    ) -> Result<(), AethError> {
        #[derive(Serialize)]
        struct BootSource<'a> {
            kernel_image_path: &'a str,
            boot_args: String,
        }

        let kernel_args = format!(
            "console=ttyS0 reboot=k panic=1 pci=off ip={ip}::{gw}:255.255.255.0::eth0:off:8.8.8.8",
            ip = lease.ip,
            gw = lease.ip.rsplit_once('.').map(|(p, _)| format!("{p}.1")).unwrap_or_default(),
        );
        api.put(
            "/boot-source",
            &BootSource {
                kernel_image_path: self.kernel_path.to_str().unwrap_or_default(),
                boot_args: kernel_args,
            },
        )
        .await?;

        #[derive(Serialize)]
        struct Drive<'a> {
            drive_id: &'a str,
            path_on_host: &'a str,
            is_root_device: bool,
            is_read_only: bool,
        }
        api.put(
            "/drives/rootfs",
            &Drive {
                drive_id: "rootfs",
                path_on_host: rootfs_path.to_str().unwrap_or_default(),
                is_root_device: true,
                is_read_only: false,
            },
        )
        .await?;

        #[derive(Serialize)]
        struct MachineConfig {
            vcpu_count: u32,
            mem_size_mib: u32,
        }
        api.put(
            "/machine-config",
            &MachineConfig {
                vcpu_count: config.vcpu_count,
                mem_size_mib: config.mem_size_mib,
            },
        )
        .await?;

        #[derive(Serialize)]
        struct NetworkInterface<'a> {
            iface_id: &'a str,
            host_dev_name: &'a str,
            guest_mac: &'a str,
        }
        api.put(
            "/network-interfaces/eth0",
            &NetworkInterface {
                iface_id: "eth0",
                host_dev_name: &lease.tap_name,
                guest_mac: &lease.mac,
            },
        )
        .await?;

        #[derive(Serialize)]
        struct VsockDevice<'a> {
            guest_cid: u32,
            uds_path: &'a str,
        }
        let vsock_path = format!("{}.vsock", self.socket_path(vm_id).display());
        api.put(
            "/vsock",
            &VsockDevice {
                guest_cid: 3,
                uds_path: &vsock_path,
            },
        )
        .await?;

        Ok(())
    }

    /// StartVM(id): requires status=Created, transitions Starting -> Running.
    pub async fn start_vm(&self, vm_id: VmId) -> Result<(), AethError> {
        let mut machines = self.machines.lock().await;
        let handle = machines
            .get_mut(&vm_id)
            .ok_or_else(|| AethError::not_found(format!("no machine registered for {vm_id}")))?;
        handle.api.start_instance().await?;
        handle.started_at = Some(chrono::Utc::now());
        info!(%vm_id, "VM started");
        Ok(())
    }

    /// StopVM(id, force): requires Running.
    pub async fn stop_vm(&self, vm_id: VmId, force: bool) -> Result<(), AethError> {
        let machines = self.machines.lock().await;
        let handle = machines
            .get(&vm_id)
            .ok_or_else(|| AethError::not_found(format!("no machine registered for {vm_id}")))?;
        if force {
            handle.process.sigkill()?;
        } else {
            handle.api.send_ctrl_alt_del().await?;
        }
        info!(%vm_id, force, "VM stopped");
        Ok(())
    }

    /// DeleteVM(id): stop if running (best-effort), tear down TAP and
    /// sockets, remove the per-VM rootfs. Cleanup failures are logged, never
    /// propagated — the in-memory entry is always removed.
    pub async fn delete_vm(&self, vm_id: VmId) -> Result<(), AethError> {
        let handle = {
            let mut machines = self.machines.lock().await;
            machines.remove(&vm_id)
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        if let Err(e) = handle.process.sigkill() {
            warn!(%vm_id, "failed to stop VM during delete: {e}");
        }
        handle.process.cleanup().await;
        self.network.destroy_tap(vm_id).await;
        self.rootfs.destroy(vm_id).await;
        let _ = handle.tap_name;
        let _ = handle.rootfs_path;
        info!(%vm_id, "VM deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(dir: &Path) -> FirecrackerDriver {
        let network = Arc::new(NetworkManager::new("aetherium0", "172.16.0.1", "tap", false, None));
        let rootfs = Arc::new(RootfsProvisioner::new(
            dir.join("template.ext4"),
            dir.join("instances"),
        ));
        FirecrackerDriver::new(
            dir.join("firecracker"),
            dir.join("vmlinux"), // intentionally absent
            dir.join("sockets"),
            network,
            rootfs,
        )
    }

    #[tokio::test]
    async fn create_vm_fails_closed_when_the_kernel_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());
        let err = driver
            .create_vm(
                VmId::new(),
                CreateVmConfig {
                    vcpu_count: 1,
                    mem_size_mib: 128,
                    rootfs_path: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, aeth_core::ErrorKind::NotFound);
        assert_eq!(driver.live_vm_ids().await.len(), 0);
    }

    #[tokio::test]
    async fn operations_on_an_unregistered_vm_id_return_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());
        let vm_id = VmId::new();
        assert_eq!(
            driver.start_vm(vm_id).await.unwrap_err().kind,
            aeth_core::ErrorKind::NotFound
        );
        assert_eq!(
            driver.stop_vm(vm_id, true).await.unwrap_err().kind,
            aeth_core::ErrorKind::NotFound
        );
        // Deleting an unregistered VM is idempotent, not an error.
        assert!(driver.delete_vm(vm_id).await.is_ok());
    }
}
