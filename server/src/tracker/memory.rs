//! In-memory last-deploy tracker

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::ServerError;
use crate::tracker::LastDeployTracker;

#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    entries: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ServerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServerError::StoreError("tracker unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LastDeployTracker for MemoryTracker {
    async fn get(&self, environment: &str, image_name: &str) -> Result<Option<String>, ServerError> {
        self.check_online()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(environment)
            .and_then(|images| images.get(image_name))
            .cloned())
    }

    async fn set(&self, environment: &str, image_name: &str, tag: &str) -> Result<(), ServerError> {
        self.check_online()?;
        let mut entries = self.entries.write().await;
        entries
            .entry(environment.to_string())
            .or_default()
            .insert(image_name.to_string(), tag.to_string());
        Ok(())
    }
}
