//! MySQL adapter for the status store

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use tracing::{debug, error, info};

use crate::errors::ServerError;
use crate::models::deployment::{DeployStatus, DeployStatusCode};
use crate::store::{queued_log, Authorizer, StatusStore, QUEUED_MESSAGE};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Status store and authorizer backed by MySQL
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Open a pool and verify the DSN with a round trip
    pub async fn connect(dsn: &SecretString, max_connections: u32) -> Result<Self, ServerError> {
        info!("Connecting to MySQL status store...");
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn.expose_secret())
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn status_from_row(row: &MySqlRow) -> Result<DeployStatus, ServerError> {
        let code: i32 = row.try_get("status")?;
        let status = DeployStatusCode::try_from(code).map_err(ServerError::StoreError)?;
        let updated_at: chrono::NaiveDateTime = row.try_get("updated_at")?;
        let created_at: chrono::NaiveDateTime = row.try_get("created_at")?;

        Ok(DeployStatus {
            deploy_id: row.try_get("deploy_id")?,
            environment: row.try_get("environment")?,
            image_name: row.try_get("image_name")?,
            image_tag: row.try_get("image_tag")?,
            status,
            message: row.try_get("message")?,
            log: row.try_get("log")?,
            updated_at: updated_at.format(TIMESTAMP_FORMAT).to_string(),
            created_at: created_at.format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

#[async_trait]
impl StatusStore for MySqlStore {
    async fn queue_deploy(
        &self,
        deploy_id: &str,
        environment: &str,
        image_name: &str,
        image_tag: &str,
    ) -> Result<(), ServerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deploys (deploy_id, environment, image_name, image_tag, status, message, log,
                updated_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(deploy_id)
        .bind(environment)
        .bind(image_name)
        .bind(image_tag)
        .bind(DeployStatusCode::Queued.code())
        .bind(QUEUED_MESSAGE)
        .bind(queued_log())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ServerError::StoreError(format!(
                "Deploy {} was not inserted",
                deploy_id
            )));
        }
        Ok(())
    }

    async fn update_deploy(
        &self,
        deploy_id: &str,
        status: DeployStatusCode,
        message: &str,
        log: &str,
    ) -> Result<bool, ServerError> {
        let result = sqlx::query(
            r#"
            UPDATE deploys
            SET status = ?, message = ?, log = ?, updated_at = NOW()
            WHERE deploy_id = ?
            "#,
        )
        .bind(status.code())
        .bind(message)
        .bind(log)
        .bind(deploy_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query_deploy(&self, deploy_id: &str) -> Result<Option<DeployStatus>, ServerError> {
        let row = sqlx::query(
            r#"
            SELECT deploy_id, environment, image_name, image_tag, status, message, log,
                updated_at, created_at
            FROM deploys WHERE deploy_id = ?
            "#,
        )
        .bind(deploy_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::status_from_row).transpose()
    }

    async fn close(&self) {
        debug!("Closing MySQL pool...");
        self.pool.close().await;
    }
}

#[async_trait]
impl Authorizer for MySqlStore {
    async fn valid_auth(&self, token: &str) -> bool {
        let result = sqlx::query("SELECT id FROM auth_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!("Token lookup failed: {}", e);
                false
            }
        }
    }

    async fn auth_deploy_env(&self, token: &str, environment: &str) -> bool {
        let result = sqlx::query(
            r#"
            SELECT ate.id AS id
            FROM auth_tokens_environments AS ate
            INNER JOIN auth_tokens AS at
                ON ate.auth_token_id = at.id
                AND at.token = ?
            INNER JOIN environments AS e
                ON ate.environment_id = e.id
                AND e.name = ?
            "#,
        )
        .bind(token)
        .bind(environment)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!("Environment authorization lookup failed: {}", e);
                false
            }
        }
    }
}
