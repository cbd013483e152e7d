//! Egress proxy manager (C8, §4.8): a managed Squid process whose ACLs are
//! regenerated from in-memory state on every update, plus access-log-derived
//! stats. Proxy-off (no `SquidManager` constructed) must never block VM
//! creation — callers treat this crate as optional infrastructure.

pub mod access_log;
pub mod acl;
pub mod squid;

pub use acl::ProxyAcl;
pub use squid::SquidManager;
