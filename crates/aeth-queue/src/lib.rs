//! Task queue abstraction (§4.1): enqueue/claim/retry over a pluggable
//! backend, with a handler-registration + dispatch loop layered on top.

pub mod backend;
pub mod memory;
pub mod queue;
pub mod redis;

pub use backend::{QueueBackend, QueueStats};
pub use memory::InMemoryBackend;
pub use queue::{HandlerResult, TaskHandler, TaskQueue};
pub use redis::RedisBackend;
