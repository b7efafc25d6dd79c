//! Last-deploy tracker
//!
//! Maps (environment, image) to the tag most recently deployed with success.
//! Read once before a run, written once after a successful one.

pub mod memory;
pub mod redis_tracker;

use async_trait::async_trait;

use crate::errors::ServerError;

#[async_trait]
pub trait LastDeployTracker: Send + Sync {
    /// Last good tag, `None` when the image was never deployed here
    async fn get(&self, environment: &str, image_name: &str) -> Result<Option<String>, ServerError>;

    /// Record a successful deploy
    async fn set(&self, environment: &str, image_name: &str, tag: &str) -> Result<(), ServerError>;
}
