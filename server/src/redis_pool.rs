//! Redis connection pool shared by the job queue and last-deploy tracker

use deadpool_redis::{Config, ConnectionAddr, ConnectionInfo, Pool, RedisConnectionInfo, Runtime};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::settings::RedisSettings;
use crate::errors::ServerError;

/// Connection parameters from settings.
///
/// Passed as fields rather than a URL so any password is accepted verbatim.
pub fn connection_info(settings: &RedisSettings) -> ConnectionInfo {
    let password = settings.password.expose_secret();
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(settings.hostname.clone(), settings.port),
        redis: RedisConnectionInfo {
            db: settings.database,
            password: (!password.is_empty()).then(|| password.to_string()),
            ..Default::default()
        },
    }
}

/// Create a pool and verify it with `PING`
pub async fn connect(settings: &RedisSettings, pool_size: usize) -> Result<Pool, ServerError> {
    info!(
        "Connecting to Redis at {}:{}...",
        settings.hostname, settings.port
    );
    let pool = Config::from_connection_info(connection_info(settings))
        .builder()
        .map_err(|e| ServerError::ConfigError(e.to_string()))?
        .max_size(pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| ServerError::ConfigError(e.to_string()))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    Ok(pool)
}

/// Close the pool, dropping idle connections and refusing new checkouts
pub fn close(pool: &Pool) {
    info!("Closing Redis pool...");
    pool.close();
}
