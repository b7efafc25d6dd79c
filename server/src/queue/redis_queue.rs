//! Redis list adapter for the job queue

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::errors::ServerError;
use crate::queue::JobQueue;

/// Job queue stored in a Redis list: `RPUSH` in, `LPOP` out
#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
    key: String,
}

impl RedisQueue {
    pub fn new(pool: Pool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, payload: &str) -> Result<(), ServerError> {
        let mut conn = self.pool.get().await?;
        conn.rpush::<_, _, ()>(&self.key, payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<String>, ServerError> {
        let mut conn = self.pool.get().await?;
        let item: Option<String> = conn.lpop(&self.key, None).await?;
        Ok(item.filter(|payload| !payload.is_empty()))
    }
}
