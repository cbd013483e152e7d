//! Workspace engine (C7, §4.7): the Create and on-demand Spawn flows,
//! ordered PrepStep execution, prompt-execute command building, and the
//! idle reaper background loop.

pub mod engine;
pub mod prep;
pub mod reaper;

pub use engine::{WorkspaceDeps, WorkspaceEngine};
pub use reaper::IdleReaper;
