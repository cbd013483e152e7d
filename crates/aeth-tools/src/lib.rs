//! Declarative tool installer (C5, §4.5): turns a VM id, a requested tool
//! set, and a version mapping into a deterministic sequence of guest
//! commands run via C4, installed through `mise`.

pub mod catalog;
pub mod installer;

pub use catalog::{default_tool_set, ToolRequest};
pub use installer::{install_tools, InstallOutcome, DEFAULT_INSTALL_TIMEOUT};
