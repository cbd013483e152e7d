//! Host-side vsock JSON-RPC client (C4, §4.4): exec over a newline-delimited
//! JSON request/response, and the one-shot secret-bootstrap listener.

pub mod client;
pub mod protocol;
pub mod secrets;

pub use client::{exec, ExecError};
pub use protocol::{ExecRequest, ExecResult};
pub use secrets::bootstrap_secrets;
