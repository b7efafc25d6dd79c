//! Status store and token authorization
//!
//! The status store keeps one row per deploy attempt. The gateway creates the
//! row at acceptance; after that only the pipeline writes to it. Rows are
//! never deleted here.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;

use crate::errors::ServerError;
use crate::models::deployment::{DeployStatus, DeployStatusCode};

/// Message written with the initial row
pub const QUEUED_MESSAGE: &str = "Queued deploy.";

/// Read/write contract of the deploy status table
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert a fresh `Queued` row for an accepted request
    async fn queue_deploy(
        &self,
        deploy_id: &str,
        environment: &str,
        image_name: &str,
        image_tag: &str,
    ) -> Result<(), ServerError>;

    /// Overwrite status, message and the full log; `true` when one row changed
    async fn update_deploy(
        &self,
        deploy_id: &str,
        status: DeployStatusCode,
        message: &str,
        log: &str,
    ) -> Result<bool, ServerError>;

    /// Fetch a row, `None` when the ID is unknown
    async fn query_deploy(&self, deploy_id: &str) -> Result<Option<DeployStatus>, ServerError>;

    /// Release connections
    async fn close(&self);
}

/// Bearer token checks used by the gateway
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Token may use the API at all
    async fn valid_auth(&self, token: &str) -> bool;

    /// Token may deploy to this environment
    async fn auth_deploy_env(&self, token: &str, environment: &str) -> bool;
}

/// Log text of a freshly queued row
pub fn queued_log() -> String {
    format!("{}\n", QUEUED_MESSAGE)
}
