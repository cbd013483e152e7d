//! Wire types for the exec and secret-bootstrap protocols (§4.4). Both are
//! single newline-terminated JSON objects, not length-prefixed persistent-
//! session frames — one request, one response, connection closed.

use serde::{Deserialize, Serialize};

pub const EXEC_PORT: u32 = 9999;
pub const SECRET_PORT: u32 = 9998;
pub const GUEST_CID: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResult {
    pub fn connect_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
            error: Some("connect failed".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretRequest {
    GetSecrets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretResponse {
    Success {
        payload: std::collections::HashMap<String, String>,
    },
    Error {
        message: String,
    },
}
