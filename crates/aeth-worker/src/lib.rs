//! Worker (C6, §4.6): task handlers for `vm:*`, `workspace:*`, and
//! `prompt:execute`, plus per-worker resource accounting and heartbeat.

pub mod handlers;
pub mod heartbeat;
pub mod resources;

pub use handlers::{
    PromptExecuteHandler, VmCreateHandler, VmDeleteHandler, VmExecuteHandler,
    WorkerHandlerDeps, WorkspaceCreateHandler, WorkspaceDeleteHandler,
};
pub use heartbeat::run_heartbeat_loop;
