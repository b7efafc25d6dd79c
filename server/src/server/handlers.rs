//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::settings::Settings;
use crate::config::value::EnvironmentEntries;
use crate::models::deployment::{
    DeployRequest, DeployStatus, DeployStatusCode, DEFAULT_IMAGE_TAG, DEFAULT_NUM_CONTAINERS,
};
use crate::server::middleware::RequestId;
use crate::server::state::ServerState;
use crate::store::queued_log;
use crate::telemetry::{collect_memory_stats, MemoryStats, RequestStats};
use crate::utils::version_info;

pub const INVALID_MEDIA_TYPE: &str = "Invalid Content-Type or Accept header value.";
pub const INVALID_JSON_TEXT: &str = "Invalid JSON format in text of body in request.";
pub const INVALID_AUTHORIZATION: &str = "Invalid authorization.";
pub const INVALID_ENV_AUTHORIZATION: &str = "Invalid authorization for environment.";
pub const INVALID_DEPLOY_ENV: &str = "Invalid 'deployEnvironment'.";
pub const INVALID_DEPLOY_IMAGE: &str = "Invalid 'image'.";
pub const CANNOT_QUEUE: &str = "Cannot queue deploy request at this time.";
pub const DEPLOY_NOT_FOUND: &str = "Deploy not found.";

const JSON_MEDIA_TYPE: &str = "application/json";

/// A rejected request: status plus `{"error": ...}` body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ApiError {
    const fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message.to_string(),
            }),
        )
            .into_response()
    }
}

fn media_type(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
}

/// Both `Content-Type` and `Accept` must be JSON
fn check_media_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let is_json = |name: header::HeaderName| media_type(headers, name) == Some(JSON_MEDIA_TYPE);
    if is_json(header::CONTENT_TYPE) && is_json(header::ACCEPT) {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            INVALID_MEDIA_TYPE,
        ))
    }
}

/// Token from `Authorization: Bearer <token>`, empty when absent
pub fn bearer_token(headers: &HeaderMap) -> &str {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim()
}

/// Header and token checks shared by every authenticated route
async fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<String, ApiError> {
    check_media_type(headers)?;

    let token = bearer_token(headers);
    if token.is_empty() || !state.authorizer.valid_auth(token).await {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, INVALID_AUTHORIZATION));
    }
    Ok(token.to_string())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: version_info().version,
    })
}

/// Server information response
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub options: Settings,
}

pub async fn info_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<InfoResponse>, ApiError> {
    authorize(&state, &headers).await?;
    Ok(Json(InfoResponse {
        options: state.settings.as_ref().clone(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub options: Settings,
    pub stats: RequestStats,
    pub uptime_secs: i64,
    pub mem_stats: MemoryStats,
}

pub async fn metrics_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<MetricsResponse>, ApiError> {
    authorize(&state, &headers).await?;

    let stats = state.stats.read().await.clone();
    let uptime_secs = stats.uptime_secs();
    let mem_stats = tokio::task::spawn_blocking(collect_memory_stats)
        .await
        .unwrap_or_default();

    Ok(Json(MetricsResponse {
        options: state.settings.as_ref().clone(),
        stats,
        uptime_secs,
        mem_stats,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    #[serde(rename = "deployID")]
    pub deploy_id: String,
}

/// Fill the environment-resolved fields of an accepted request
pub fn resolve_environment(request: &mut DeployRequest, entries: &EnvironmentEntries) {
    request.env_tag = entries.string("env_tag");
    request.etcd_endpoint = entries.string("etcd_endpoint");
    request.machine = entries.string("machine");
    request.meta_mount = entries.string("metadata_mount");
    request.registry = entries.string("docker_registry");
    request.num_cont = entries
        .int("num_containers")
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_NUM_CONTAINERS);
    request.swarm = entries.bool("swarm");
}

/// Validate a deploy request, record it as queued and push it to the queue
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeployResponse>, ApiError> {
    let token = authorize(&state, &headers).await?;

    let mut request: DeployRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, INVALID_JSON_TEXT))?;

    let entries = state
        .settings
        .environment(&request.environment)
        .ok_or(ApiError::new(StatusCode::BAD_REQUEST, INVALID_DEPLOY_ENV))?;

    if !state
        .authorizer
        .auth_deploy_env(&token, &request.environment)
        .await
    {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            INVALID_ENV_AUTHORIZATION,
        ));
    }

    if request.image_name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, INVALID_DEPLOY_IMAGE));
    }
    if request.image_tag.is_empty() {
        request.image_tag = DEFAULT_IMAGE_TAG.to_string();
    }

    // Client-supplied IDs are ignored
    request.deploy_id = request_id;
    resolve_environment(&mut request, entries);

    let cannot_queue = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, CANNOT_QUEUE);
    let payload = request.to_payload().map_err(|e| {
        error!("Unable to encode deploy request: {}", e);
        cannot_queue
    })?;

    state
        .store
        .queue_deploy(
            &request.deploy_id,
            &request.environment,
            &request.image_name,
            &request.image_tag,
        )
        .await
        .map_err(|e| {
            error!("Unable to record deploy {}: {}", request.deploy_id, e);
            cannot_queue
        })?;

    if let Err(e) = state.queue.enqueue(&payload).await {
        error!("Unable to queue deploy {}: {}", request.deploy_id, e);
        let log = format!("{}ERR: {}\n{}\n", queued_log(), CANNOT_QUEUE, e);
        if let Err(e) = state
            .store
            .update_deploy(&request.deploy_id, DeployStatusCode::Failed, CANNOT_QUEUE, &log)
            .await
        {
            warn!("Unable to mark deploy {} failed: {}", request.deploy_id, e);
        }
        return Err(cannot_queue);
    }

    info!(
        "Queued deploy {} of {}:{} to {}",
        request.deploy_id, request.image_name, request.image_tag, request.environment
    );
    Ok(Json(DeployResponse {
        deploy_id: request.deploy_id,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusNotFound {
    pub id: String,
    pub error: String,
}

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(deploy_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers).await?;

    let not_found = |error: String| {
        (
            StatusCode::NOT_FOUND,
            Json(StatusNotFound {
                id: deploy_id.clone(),
                error,
            }),
        )
            .into_response()
    };

    let response = match state.store.query_deploy(&deploy_id).await {
        Ok(Some(status)) => Json::<DeployStatus>(status).into_response(),
        Ok(None) => not_found(DEPLOY_NOT_FOUND.to_string()),
        Err(e) => {
            warn!("Unable to query deploy {}: {}", deploy_id, e);
            not_found(e.to_string())
        }
    };
    Ok(response)
}
