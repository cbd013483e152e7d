//! Postgres pool creation and migration runner.

use aeth_core::AethError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Connects and runs the embedded migrations. The migrations directory is
/// read at build time, so this never depends on a prior `sqlx-cli` run.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, AethError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| AethError::unavailable(format!("connecting to postgres: {e}")).with_source(e))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AethError::internal(format!("running migrations: {e}")).with_source(e))?;

    info!(max_connections = config.max_connections, "connected to postgres");
    Ok(pool)
}

pub(crate) fn map_sqlx_err(context: &'static str, err: sqlx::Error) -> AethError {
    match err {
        sqlx::Error::RowNotFound => AethError::not_found(context),
        other => AethError::internal(format!("{context}: {other}")).with_source(other),
    }
}
