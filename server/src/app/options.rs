//! Application configuration options

use std::time::Duration;

use crate::config::settings::Settings;
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Connection pool sizes
    pub pools: PoolOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployer worker options
    pub deployer: deployer::Options,
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            server: ServerOptions {
                host: settings.hostname.clone(),
                port: settings.port,
            },
            deployer: deployer::Options {
                interval: settings.redis.poll_interval(),
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the server
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown; an in-flight deploy counts against it
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub mysql_connections: u32,
    pub redis_connections: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            mysql_connections: 10,
            redis_connections: 16,
        }
    }
}

/// HTTP gateway options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}
