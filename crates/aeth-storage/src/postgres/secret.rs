use crate::pool::map_sqlx_err;
use aeth_core::repo::SecretRepo;
use aeth_core::secret::{Secret, SecretType};
use aeth_core::{AethError, SecretId, WorkspaceId};
use async_trait::async_trait;
use sqlx::PgPool;

fn type_to_str(t: SecretType) -> &'static str {
    match t {
        SecretType::ApiKey => "api_key",
        SecretType::Token => "token",
        SecretType::SshKey => "ssh_key",
        SecretType::Password => "password",
        SecretType::Other => "other",
    }
}

fn type_from_str(s: &str) -> Result<SecretType, AethError> {
    Ok(match s {
        "api_key" => SecretType::ApiKey,
        "token" => SecretType::Token,
        "ssh_key" => SecretType::SshKey,
        "password" => SecretType::Password,
        "other" => SecretType::Other,
        other => return Err(AethError::internal(format!("unknown secret type {other:?} in storage"))),
    })
}

#[derive(sqlx::FromRow)]
struct SecretRow {
    id: uuid::Uuid,
    workspace_id: Option<uuid::Uuid>,
    name: String,
    secret_type: String,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    key_id: String,
}

impl SecretRow {
    fn into_secret(self) -> Result<Secret, AethError> {
        Ok(Secret {
            id: SecretId::from_uuid(self.id),
            workspace_id: self.workspace_id.map(WorkspaceId::from_uuid),
            name: self.name,
            secret_type: type_from_str(&self.secret_type)?,
            ciphertext: self.ciphertext,
            nonce: self.nonce,
            key_id: self.key_id,
        })
    }
}

pub struct PgSecretRepo {
    pool: PgPool,
}

impl PgSecretRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretRepo for PgSecretRepo {
    async fn create(&self, secret: &Secret) -> Result<(), AethError> {
        sqlx::query(
            "INSERT INTO secrets (id, workspace_id, name, secret_type, ciphertext, nonce, key_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(secret.id.as_uuid())
        .bind(secret.workspace_id.map(|id| id.as_uuid()))
        .bind(&secret.name)
        .bind(type_to_str(secret.secret_type))
        .bind(&secret.ciphertext)
        .bind(&secret.nonce)
        .bind(&secret.key_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_err("creating secret", e))?;
        Ok(())
    }

    async fn get(&self, id: SecretId) -> Result<Secret, AethError> {
        sqlx::query_as::<_, SecretRow>("SELECT * FROM secrets WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("secret", e))?
            .into_secret()
    }

    async fn get_by_name(&self, workspace_id: Option<WorkspaceId>, name: &str) -> Result<Secret, AethError> {
        let row = match workspace_id {
            Some(id) => sqlx::query_as::<_, SecretRow>(
                "SELECT * FROM secrets WHERE workspace_id = $1 AND name = $2",
            )
            .bind(id.as_uuid())
            .bind(name)
            .fetch_one(&self.pool)
            .await,
            None => sqlx::query_as::<_, SecretRow>(
                "SELECT * FROM secrets WHERE workspace_id IS NULL AND name = $1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await,
        };
        row.map_err(|e| map_sqlx_err("secret", e))?.into_secret()
    }

    async fn list_for_workspace(&self, workspace_id: Option<WorkspaceId>) -> Result<Vec<Secret>, AethError> {
        let rows = match workspace_id {
            Some(id) => {
                sqlx::query_as::<_, SecretRow>("SELECT * FROM secrets WHERE workspace_id = $1 ORDER BY name")
                    .bind(id.as_uuid())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as::<_, SecretRow>("SELECT * FROM secrets WHERE workspace_id IS NULL ORDER BY name")
                    .fetch_all(&self.pool)
                    .await
            }
        };
        rows.map_err(|e| map_sqlx_err("listing secrets", e))?
            .into_iter()
            .map(SecretRow::into_secret)
            .collect()
    }

    async fn delete(&self, id: SecretId) -> Result<(), AethError> {
        sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("deleting secret", e))?;
        Ok(())
    }

    async fn delete_for_workspace(&self, workspace_id: WorkspaceId) -> Result<(), AethError> {
        sqlx::query("DELETE FROM secrets WHERE workspace_id = $1")
            .bind(workspace_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("deleting workspace secrets", e))?;
        Ok(())
    }
}
