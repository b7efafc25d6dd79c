//! Per-request bookkeeping and common response headers

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::server::state::ServerState;
use crate::utils::generate_uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Stats bucket for requests that matched no route
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Identifier minted for every request; accepted deploys reuse it as their ID
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Count the request, tag it with an ID and set the common response headers
pub async fn track_request(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    state.stats.write().await.record_request(bytes);

    let request_id = generate_uuid();
    debug!("{} {} [{}]", request.method(), request.uri().path(), request_id);
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    // Keyed by route template so path parameters do not grow the map
    let route = response
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    state.stats.write().await.record_route(&route, bytes);

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    if let Ok(value) = HeaderValue::from_str(&state.settings.server_name) {
        headers.insert(header::SERVER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Hand the matched route template back out to `track_request`.
///
/// Runs as a route layer, after routing has resolved the template.
pub async fn tag_route(matched: MatchedPath, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.extensions_mut().insert(matched);
    response
}
