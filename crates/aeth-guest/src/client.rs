//! `exec()`: dial the Firecracker vsock UDS proxy, run one command in the
//! guest, and read back one response. Follows the same CONNECT/OK vsock
//! handshake as `worker::vsock::connect`, generalized from a length-prefixed
//! persistent session to the single newline-delimited request/response this
//! protocol uses (§4.4).

use crate::protocol::{ExecRequest, ExecResult, EXEC_PORT};
use aeth_core::retry;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const CONNECT_RETRY_DEADLINE: Duration = Duration::from_secs(15);
const CONNECT_MAX_ATTEMPTS: u32 = 60;
const OVERALL_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("vsock connect failed: {0}")]
    Connect(String),
    #[error("guest exec timed out")]
    Timeout,
}

/// Runs `cmd` in the VM behind `vsock_uds_path` and returns its result.
/// On connect failure, returns an `ExecResult` with `exit_code=1` and a
/// diagnostic `stderr` rather than an error — exec failures are data the
/// caller's task-retry policy decides what to do with, not an exception
/// this client should retry indefinitely for.
pub async fn exec(vsock_uds_path: &Path, request: ExecRequest) -> ExecResult {
    match timeout(OVERALL_DEADLINE, run(vsock_uds_path, request)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ExecResult::connect_failure(e.to_string()),
        Err(_) => ExecResult::connect_failure("guest exec did not complete within 30s"),
    }
}

async fn run(vsock_uds_path: &Path, request: ExecRequest) -> Result<ExecResult, ExecError> {
    let mut stream = retry::retry_async(
        CONNECT_MAX_ATTEMPTS,
        CONNECT_RETRY_INTERVAL,
        CONNECT_RETRY_DEADLINE,
        "guest-vsock-connect",
        || connect(vsock_uds_path),
    )
    .await
    .map_err(ExecError::Connect)?;

    let mut line = serde_json::to_string(&request).map_err(|e| ExecError::Connect(e.to_string()))?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ExecError::Connect(e.to_string()))?;
    stream.flush().await.map_err(|e| ExecError::Connect(e.to_string()))?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .await
        .map_err(|e| ExecError::Connect(e.to_string()))?;

    serde_json::from_str(response_line.trim_end())
        .map_err(|e| ExecError::Connect(format!("malformed guest response: {e}")))
}

async fn connect(vsock_uds_path: &Path) -> Result<UnixStream, String> {
    let mut stream = UnixStream::connect(vsock_uds_path)
        .await
        .map_err(|e| e.to_string())?;

    stream
        .write_all(format!("CONNECT {EXEC_PORT}\n").as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    stream.flush().await.map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&mut stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.map_err(|e| e.to_string())?;
    if !response.starts_with("OK ") {
        return Err(format!("unexpected CONNECT response: {}", response.trim()));
    }
    drop(reader);
    Ok(stream)
}
