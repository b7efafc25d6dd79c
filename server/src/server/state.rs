//! Server state

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::settings::Settings;
use crate::queue::JobQueue;
use crate::store::{Authorizer, StatusStore};
use crate::telemetry::RequestStats;

/// Server state shared across handlers
pub struct ServerState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn StatusStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub queue: Arc<dyn JobQueue>,
    pub stats: RwLock<RequestStats>,
}

impl ServerState {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn StatusStore>,
        authorizer: Arc<dyn Authorizer>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            settings,
            store,
            authorizer,
            queue,
            stats: RwLock::new(RequestStats::new()),
        }
    }
}
