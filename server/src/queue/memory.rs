//! In-memory job queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::ServerError;
use crate::queue::JobQueue;

/// FIFO queue in process memory; can be switched offline to simulate an outage
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    items: Arc<Mutex<VecDeque<String>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_online(&self) -> Result<(), ServerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServerError::QueueError("queue unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, payload: &str) -> Result<(), ServerError> {
        self.check_online()?;
        self.items.lock().await.push_back(payload.to_string());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<String>, ServerError> {
        self.check_online()?;
        Ok(self.items.lock().await.pop_front())
    }
}
