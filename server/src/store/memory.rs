//! In-memory status store and authorizer

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::ServerError;
use crate::models::deployment::{DeployStatus, DeployStatusCode};
use crate::store::{queued_log, Authorizer, StatusStore, QUEUED_MESSAGE};

#[derive(Debug, Default)]
struct Inner {
    deploys: HashMap<String, DeployStatus>,
    history: HashMap<String, Vec<DeployStatus>>,
    tokens: HashSet<String>,
    grants: HashSet<(String, String)>,
}

/// Status store kept in process memory; also records every write per deploy
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API token, optionally granted a set of environments
    pub async fn grant(&self, token: &str, environments: &[&str]) {
        let mut inner = self.inner.write().await;
        inner.tokens.insert(token.to_string());
        for env in environments {
            inner.grants.insert((token.to_string(), env.to_string()));
        }
    }

    /// Every version of a row, oldest first
    pub async fn history(&self, deploy_id: &str) -> Vec<DeployStatus> {
        let inner = self.inner.read().await;
        inner.history.get(deploy_id).cloned().unwrap_or_default()
    }

    /// Number of rows
    pub async fn len(&self) -> usize {
        self.inner.read().await.deploys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn now() -> String {
        Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn queue_deploy(
        &self,
        deploy_id: &str,
        environment: &str,
        image_name: &str,
        image_tag: &str,
    ) -> Result<(), ServerError> {
        let mut inner = self.inner.write().await;
        if inner.deploys.contains_key(deploy_id) {
            return Err(ServerError::StoreError(format!(
                "Duplicate deploy ID: {}",
                deploy_id
            )));
        }

        let now = Self::now();
        let row = DeployStatus {
            deploy_id: deploy_id.to_string(),
            environment: environment.to_string(),
            image_name: image_name.to_string(),
            image_tag: image_tag.to_string(),
            status: DeployStatusCode::Queued,
            message: QUEUED_MESSAGE.to_string(),
            log: queued_log(),
            updated_at: now.clone(),
            created_at: now,
        };
        inner
            .history
            .entry(deploy_id.to_string())
            .or_default()
            .push(row.clone());
        inner.deploys.insert(deploy_id.to_string(), row);
        Ok(())
    }

    async fn update_deploy(
        &self,
        deploy_id: &str,
        status: DeployStatusCode,
        message: &str,
        log: &str,
    ) -> Result<bool, ServerError> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner.deploys.get_mut(deploy_id) else {
            return Ok(false);
        };

        row.status = status;
        row.message = message.to_string();
        row.log = log.to_string();
        row.updated_at = Self::now();
        let snapshot = row.clone();

        inner
            .history
            .entry(deploy_id.to_string())
            .or_default()
            .push(snapshot);
        Ok(true)
    }

    async fn query_deploy(&self, deploy_id: &str) -> Result<Option<DeployStatus>, ServerError> {
        Ok(self.inner.read().await.deploys.get(deploy_id).cloned())
    }

    async fn close(&self) {}
}

#[async_trait]
impl Authorizer for MemoryStore {
    async fn valid_auth(&self, token: &str) -> bool {
        self.inner.read().await.tokens.contains(token)
    }

    async fn auth_deploy_env(&self, token: &str, environment: &str) -> bool {
        self.inner
            .read()
            .await
            .grants
            .contains(&(token.to_string(), environment.to_string()))
    }
}
