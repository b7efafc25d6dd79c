//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ServerError;
use crate::server::handlers::{
    deploy_handler, health_handler, info_handler, metrics_handler, status_handler,
};
use crate::server::middleware::{tag_route, track_request};
use crate::server::state::ServerState;

/// Prefix the API is also published under
pub const API_PREFIX: &str = "/v1.0";

/// Build the gateway router
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .route("/deploy", post(deploy_handler))
        .route("/status/{deploy_id}", get(status_handler))
        .route_layer(middleware::from_fn(tag_route));

    Router::new()
        .nest(API_PREFIX, api.clone())
        .merge(api)
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ServerError>>, ServerError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServerError(e.to_string()))
    });

    Ok(handle)
}
