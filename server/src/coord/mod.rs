//! Coordination endpoint clients
//!
//! Metadata keys are published into a key-value service attached to an
//! environment. The connector opens one client per publish step.

pub mod etcd;

use async_trait::async_trait;

use crate::errors::ServerError;

/// A connected key-value coordination service
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Set a single key
    async fn set(&self, key: &str, value: &str) -> Result<(), ServerError>;
}

/// Opens clients for coordination endpoints
pub trait CoordConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn KeyValueClient>, ServerError>;
}
