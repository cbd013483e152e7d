//! `aethctl`: daemon bootstrap plus the operator CLI surface (§7). A
//! thin client over the same repositories and engines the daemon process
//! runs, not a separate service — there is no gateway in front of it.

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod observability;

pub use bootstrap::Daemon;
pub use commands::{build_cli, run};
pub use config::DaemonConfig;
