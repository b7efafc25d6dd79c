//! Job queue
//!
//! A FIFO list of serialized deploy requests. Delivery is at most once: an
//! item popped by a worker that then dies is gone, and the client has to
//! submit the deploy again.

pub mod memory;
pub mod redis_queue;

use async_trait::async_trait;

use crate::errors::ServerError;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a payload at the tail
    async fn enqueue(&self, payload: &str) -> Result<(), ServerError>;

    /// Pop the head; `None` when nothing is pending
    async fn dequeue(&self) -> Result<Option<String>, ServerError>;
}
