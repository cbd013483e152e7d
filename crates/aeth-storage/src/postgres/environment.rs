use crate::pool::map_sqlx_err;
use aeth_core::environment::{AiAssistant, Environment, McpServer};
use aeth_core::repo::EnvironmentRepo;
use aeth_core::{AethError, EnvironmentId};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;

fn assistant_to_str(a: AiAssistant) -> &'static str {
    match a {
        AiAssistant::ClaudeCode => "claude-code",
        AiAssistant::Ampcode => "ampcode",
    }
}

fn assistant_from_str(s: &str) -> Result<AiAssistant, AethError> {
    Ok(match s {
        "claude-code" => AiAssistant::ClaudeCode,
        "ampcode" => AiAssistant::Ampcode,
        other => return Err(AethError::internal(format!("unknown ai assistant {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    id: uuid::Uuid,
    name: String,
    vcpus: i32,
    memory_mb: i32,
    git_repo_url: Option<String>,
    git_branch: Option<String>,
    working_dir: String,
    tools: Json<Vec<String>>,
    env_vars: Json<HashMap<String, String>>,
    mcp_servers: Json<Vec<McpServer>>,
    ai_assistant: String,
    idle_timeout_seconds: i64,
}

impl EnvironmentRow {
    fn into_environment(self) -> Result<Environment, AethError> {
        Ok(Environment {
            id: EnvironmentId::from_uuid(self.id),
            name: self.name,
            vcpus: self.vcpus as u32,
            memory_mb: self.memory_mb as u32,
            git_repo_url: self.git_repo_url,
            git_branch: self.git_branch,
            working_dir: self.working_dir,
            tools: self.tools.0,
            env_vars: self.env_vars.0,
            mcp_servers: self.mcp_servers.0,
            ai_assistant: assistant_from_str(&self.ai_assistant)?,
            idle_timeout_seconds: self.idle_timeout_seconds as u64,
        })
    }
}

pub struct PgEnvironmentRepo {
    pool: PgPool,
}

impl PgEnvironmentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvironmentRepo for PgEnvironmentRepo {
    async fn create(&self, env: &Environment) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO environments (id, name, vcpus, memory_mb, git_repo_url, git_branch, \
             working_dir, tools, env_vars, mcp_servers, ai_assistant, idle_timeout_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(env.id.as_uuid())
        .bind(&env.name)
        .bind(env.vcpus as i32)
        .bind(env.memory_mb as i32)
        .bind(&env.git_repo_url)
        .bind(&env.git_branch)
        .bind(&env.working_dir)
        .bind(Json(&env.tools))
        .bind(Json(&env.env_vars))
        .bind(Json(&env.mcp_servers))
        .bind(assistant_to_str(env.ai_assistant))
        .bind(env.idle_timeout_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating environment", e))?;
        Ok(())
    }

    async fn get(&self, id: EnvironmentId) -> Result<Environment, AethError> {
        sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("environment", e))?
            .into_environment()
    }

    async fn get_by_name(&self, name: &str) -> Result<Environment, AethError> {
        sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("environment", e))?
            .into_environment()
    }

    async fn list(&self) -> Result<Vec<Environment>, AethError> {
        sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("listing environments", e))?
            .into_iter()
            .map(EnvironmentRow::into_environment)
            .collect()
    }
}
