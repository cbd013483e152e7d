//! Spawns the Firecracker VMM process and speaks its UNIX-socket HTTP API
//! (§6): `PUT /boot-source`, `/drives/{id}`, `/machine-config`, `/actions`,
//! `GET /`. Grounded on the pack's `fctools::process::VmmProcess` pattern —
//! generalized from a generic `VmmExecutor` to a direct child-process spawn
//! since Aetherium's orchestrator runs on the bare host, not inside a
//! jailer/dev VM.

use aeth_core::{AethError, VmId};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1 as client_http1;
use hyper::{Method, Request, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub struct FirecrackerProcess {
    pub vm_id: VmId,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    child: Child,
}

impl FirecrackerProcess {
    /// Spawns `firecracker --api-sock <socket> --log-path <log> --level Debug`
    /// detached from the caller's process group so it outlives the RPC that
    /// created it (§4.3 step 4: "background context decoupled from the caller").
    pub async fn spawn(
        binary: &Path,
        vm_id: VmId,
        socket_path: &Path,
        log_path: &Path,
    ) -> Result<Self, AethError> {
        if socket_path.exists() {
            let _ = std::fs::remove_file(socket_path);
        }

        let child = Command::new(binary)
            .arg("--api-sock")
            .arg(socket_path)
            .arg("--log-path")
            .arg(log_path)
            .arg("--level")
            .arg("Debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| AethError::unavailable(format!("spawning firecracker: {e}")))?;

        for _ in 0..150 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        if !socket_path.exists() {
            return Err(AethError::unavailable(
                "firecracker API socket never appeared",
            ));
        }

        info!(%vm_id, socket = %socket_path.display(), "firecracker process started");
        Ok(Self {
            vm_id,
            socket_path: socket_path.to_path_buf(),
            log_path: log_path.to_path_buf(),
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait_for_exit(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// `SIGKILL` immediate stop, used by `StopVM(id, force=true)`.
    pub fn sigkill(&self) -> Result<(), AethError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // SAFETY: pid came from the Child we spawned and own.
        let rc = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        if rc != 0 && std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH) {
            warn!(vm_id = %self.vm_id, pid, "sigkill failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub async fn cleanup(&self) {
        for path in [&self.socket_path, &self.log_path] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(vm_id = %self.vm_id, path = %path.display(), "cleanup failed: {e}");
                }
            }
        }
    }
}

/// A single-shot HTTP/1.1 request over the VM's Firecracker API socket.
/// Firecracker serves one request at a time so there is no benefit to a
/// pooled connection here — handshake fresh per call, matching the
/// request cadence of VM lifecycle operations (a handful of calls total).
pub struct ApiClient {
    socket_path: PathBuf,
}

impl ApiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + ?Sized)>,
    ) -> Result<(StatusCode, String), AethError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| AethError::unavailable(format!("dialing firecracker API socket: {e}")))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = client_http1::handshake(io)
            .await
            .map_err(|e| AethError::unavailable(format!("http1 handshake: {e}")))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost")
            .header("content-type", "application/json");

        let response = if let Some(body) = body {
            let json = serde_json::to_vec(body)
                .map_err(|e| AethError::internal(format!("serializing request body: {e}")))?;
            let req = request
                .body(Full::new(Bytes::from(json)).map_err(|never| match never {}).boxed())
                .map_err(|e| AethError::internal(format!("building request: {e}")))?;
            sender.send_request(req).await
        } else {
            let req = request
                .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
                .map_err(|e| AethError::internal(format!("building request: {e}")))?;
            sender.send_request(req).await
        }
        .map_err(|e| AethError::unavailable(format!("firecracker API request failed: {e}")))?;

        let status = response.status();
        let body = response
            .collect()
            .await
            .map_err(|e| AethError::unavailable(format!("reading firecracker API response: {e}")))?
            .to_bytes();
        let text = String::from_utf8_lossy(&body).into_owned();
        Ok((status, text))
    }

    pub async fn put(&self, path: &str, body: &impl Serialize) -> Result<(), AethError> {
        let (status, text) = self.send(Method::PUT, path, Some(body)).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(AethError::unavailable(format!(
                "firecracker API {path} returned {status}: {text}"
            )))
        }
    }

    pub async fn get_instance_info(&self) -> Result<String, AethError> {
        let (status, text) = self.send(Method::GET, "/", None::<&()>).await?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(AethError::unavailable(format!(
                "firecracker instance-info returned {status}: {text}"
            )))
        }
    }

    pub async fn start_instance(&self) -> Result<(), AethError> {
        self.put("/actions", &serde_json::json!({"action_type": "InstanceStart"}))
            .await
    }

    pub async fn send_ctrl_alt_del(&self) -> Result<(), AethError> {
        self.put(
            "/actions",
            &serde_json::json!({"action_type": "SendCtrlAltDel"}),
        )
        .await
    }
}
