//! Secret bootstrap (§4.4): the orchestrator opens a host vsock listener on
//! port 9998 *before* `StartVM`, then waits up to 30 s after start for the
//! guest to connect and ask for its secrets. One-shot: the first connection
//! is served and the listener is torn down. Secrets never touch host disk
//! in this exchange — they live only in the in-memory map handed to
//! `bootstrap_secrets` and in the single response written to the socket.

use crate::protocol::{SecretRequest, SecretResponse};
use aeth_core::AethError;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::info;

const WAIT_FOR_GUEST: Duration = Duration::from_secs(30);

/// Binds the listener. Call this before `StartVM` so the guest can never
/// win the race by connecting before the host is listening (§5 open
/// question (c): the protocol assumes host-first and implementers must
/// preserve that ordering).
pub async fn listen(uds_path: &Path) -> Result<UnixListener, AethError> {
    if uds_path.exists() {
        let _ = std::fs::remove_file(uds_path);
    }
    UnixListener::bind(uds_path)
        .map_err(|e| AethError::unavailable(format!("binding secret-bootstrap listener: {e}")))
}

/// Waits for the one-shot guest connection and serves `secrets`. Removes the
/// socket file on return regardless of outcome.
pub async fn bootstrap_secrets(
    listener: UnixListener,
    uds_path: &Path,
    secrets: HashMap<String, String>,
) -> Result<(), AethError> {
    let result = timeout(WAIT_FOR_GUEST, serve_one(listener, secrets)).await;
    let _ = tokio::fs::remove_file(uds_path).await;
    match result {
        Ok(inner) => inner,
        Err(_) => Err(AethError::timeout(
            "guest did not connect for secret bootstrap within 30s",
        )),
    }
}

async fn serve_one(
    listener: UnixListener,
    secrets: HashMap<String, String>,
) -> Result<(), AethError> {
    let (stream, _) = listener
        .accept()
        .await
        .map_err(|e| AethError::unavailable(format!("accepting guest connection: {e}")))?;
    handle_connection(stream, secrets).await
}

async fn handle_connection(
    mut stream: UnixStream,
    secrets: HashMap<String, String>,
) -> Result<(), AethError> {
    let mut reader = BufReader::new(&mut stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| AethError::unavailable(format!("reading guest secret request: {e}")))?;

    let request: SecretRequest = serde_json::from_str(line.trim_end())
        .map_err(|e| AethError::invalid(format!("malformed secret request: {e}")))?;
    let SecretRequest::GetSecrets = request;

    let response = SecretResponse::Success { payload: secrets };
    let mut out = serde_json::to_string(&response)
        .map_err(|e| AethError::internal(format!("serializing secret response: {e}")))?;
    out.push('\n');
    drop(reader);
    stream
        .write_all(out.as_bytes())
        .await
        .map_err(|e| AethError::unavailable(format!("writing secret response: {e}")))?;

    info!("secrets delivered to guest over vsock bootstrap channel");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guest_receives_the_secrets_it_asked_for() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("secrets.vsock");
        let listener = listen(&sock_path).await.unwrap();

        let mut secrets = HashMap::new();
        secrets.insert("GITHUB_TOKEN".to_string(), "ghp_example".to_string());
        let sock_path_clone = sock_path.clone();
        let server = tokio::spawn(async move {
            bootstrap_secrets(listener, &sock_path_clone, secrets).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        client.write_all(b"{\"type\":\"get_secrets\"}\n").await.unwrap();
        let mut reader = BufReader::new(&mut client);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();

        let response: SecretResponse = serde_json::from_str(response_line.trim_end()).unwrap();
        match response {
            SecretResponse::Success { payload } => {
                assert_eq!(payload.get("GITHUB_TOKEN").unwrap(), "ghp_example");
            }
            SecretResponse::Error { message } => panic!("unexpected error: {message}"),
        }

        server.await.unwrap().unwrap();
        assert!(!sock_path.exists());
    }

    #[tokio::test]
    async fn a_guest_that_never_connects_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("secrets.vsock");
        let listener = listen(&sock_path).await.unwrap();

        // Can't wait the real 30s in a test; call serve_one with a short
        // external timeout instead of the production constant.
        let result = timeout(Duration::from_millis(50), serve_one(listener, HashMap::new())).await;
        assert!(result.is_err());
    }
}
