//! Application state management

use std::sync::Arc;

use deadpool_redis::Pool;
use tracing::info;

use crate::app::options::PoolOptions;
use crate::config::settings::Settings;
use crate::coord::etcd::EtcdConnector;
use crate::deploy::executor::ScriptRunner;
use crate::deploy::pipeline::{DeployPipeline, PipelineOptions};
use crate::errors::ServerError;
use crate::queue::redis_queue::RedisQueue;
use crate::queue::JobQueue;
use crate::redis_pool;
use crate::store::mysql::MySqlStore;
use crate::store::{Authorizer, StatusStore};
use crate::tracker::redis_tracker::RedisTracker;

/// Main application state
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn StatusStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub queue: Arc<dyn JobQueue>,
    pub pipeline: Arc<DeployPipeline>,
    redis: Pool,
}

impl AppState {
    /// Connect the backing services and assemble the pipeline
    pub async fn init(settings: Arc<Settings>, pools: PoolOptions) -> Result<Self, ServerError> {
        info!("Initializing application state...");

        let mysql = Arc::new(MySqlStore::connect(&settings.dsn, pools.mysql_connections).await?);
        let redis = redis_pool::connect(&settings.redis, pools.redis_connections).await?;

        let store: Arc<dyn StatusStore> = mysql.clone();
        let queue = Arc::new(RedisQueue::new(redis.clone(), settings.redis.key_queue.clone()));
        let tracker = Arc::new(RedisTracker::new(
            redis.clone(),
            settings.redis.key_last_deploy.clone(),
        ));
        let runner = Arc::new(ScriptRunner::new(
            settings.scripts_path.clone(),
            settings.strict_stderr,
        ));

        let pipeline = Arc::new(DeployPipeline::new(
            PipelineOptions::from(settings.as_ref()),
            store.clone(),
            tracker,
            runner,
            Arc::new(EtcdConnector),
        ));

        Ok(Self {
            settings,
            store,
            authorizer: mysql,
            queue,
            pipeline,
            redis,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("Shutting down application state...");
        self.store.close().await;
        redis_pool::close(&self.redis);
        Ok(())
    }
}
