//! Repository implementations (C1, §4.2): a Postgres backend for production
//! and an in-memory store for tests and single-node dev runs.

pub mod memory;
pub mod pool;
pub mod postgres;

pub use memory::InMemoryStore;
pub use pool::{create_pool, DbConfig};
pub use postgres::{
    PgAuditRepo, PgEnvironmentRepo, PgExecutionRepo, PgPrepStepRepo, PgPromptTaskRepo, PgSecretRepo,
    PgTaskRepo, PgVmRepo, PgWorkerRepo, PgWorkspaceRepo,
};
