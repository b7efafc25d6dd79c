//! Docker deploy server library
//!
//! Queue-driven deploys of Docker images into single machines or Swarm
//! clusters, with an HTTP gateway in front and a status store behind.

pub mod app;
pub mod config;
pub mod coord;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod queue;
pub mod redis_pool;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod utils;
pub mod workers;
