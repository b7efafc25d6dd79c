//! Redis hash adapter for the last-deploy tracker

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::errors::ServerError;
use crate::tracker::LastDeployTracker;

/// One hash per environment (`<prefix>:<environment>`), one field per image
#[derive(Clone)]
pub struct RedisTracker {
    pool: Pool,
    prefix: String,
}

impl RedisTracker {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn hash_key(&self, environment: &str) -> String {
        format!("{}:{}", self.prefix, environment)
    }
}

#[async_trait]
impl LastDeployTracker for RedisTracker {
    async fn get(&self, environment: &str, image_name: &str) -> Result<Option<String>, ServerError> {
        let mut conn = self.pool.get().await?;
        let tag: Option<String> = conn.hget(self.hash_key(environment), image_name).await?;
        Ok(tag.filter(|t| !t.is_empty()))
    }

    async fn set(&self, environment: &str, image_name: &str, tag: &str) -> Result<(), ServerError> {
        let mut conn = self.pool.get().await?;
        conn.hset::<_, _, _, ()>(self.hash_key(environment), image_name, tag)
            .await?;
        Ok(())
    }
}
