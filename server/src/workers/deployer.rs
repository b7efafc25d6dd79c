//! Deploy worker
//!
//! Single-flight: one request is taken off the queue and run to completion
//! before the queue is polled again.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::pipeline::{DeployPipeline, RunOutcome};
use crate::models::deployment::DeployRequest;
use crate::queue::JobQueue;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Queue polling interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the deployer worker until the shutdown signal fires
pub async fn run<S, F>(
    options: &Options,
    queue: &dyn JobQueue,
    pipeline: &DeployPipeline,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Deployer worker starting...");

    // First poll is immediate, then a fixed interval between iterations
    let mut wait = Duration::ZERO;
    loop {
        // Check for shutdown
        tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }

        // Outside the select: a started run is never cut short by shutdown
        if let Some(outcome) = process_next(queue, pipeline).await {
            debug!("Deploy finished: {:?}", outcome);
        }
        wait = options.interval;
    }
}

/// Take one request off the queue and run it.
///
/// `None` when the queue is empty or unreachable.
pub async fn process_next(queue: &dyn JobQueue, pipeline: &DeployPipeline) -> Option<RunOutcome> {
    let payload = match queue.dequeue().await {
        Ok(Some(payload)) => payload,
        Ok(None) => return None,
        Err(e) => {
            error!("Failed to poll the deploy queue: {}", e);
            return None;
        }
    };

    let request = match DeployRequest::from_payload(&payload) {
        Ok(request) => request,
        Err(e) => {
            // Dropped: there is no row to fail without an ID
            error!("Discarding malformed queue item: {}", e);
            return Some(RunOutcome::Aborted);
        }
    };

    info!("Received deploy request {}", request.deploy_id);
    Some(pipeline.run(&request).await)
}
