//! DocSafe upload handlers
//! Handles /api/docsafe, /api/process and /api/quota

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use tracing::Instrument;

use crate::proxy::relay::relay_upload;
use crate::proxy::routes::Endpoint;
use crate::proxy::server::AppState;

/// Handle POST /api/docsafe
pub async fn handle_docsafe(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    relay(state, Endpoint::DocSafe, headers, multipart).await
}

/// Handle POST /api/process, kept for older clients (strict PDF by default)
pub async fn handle_process(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    relay(state, Endpoint::LegacyProcess, headers, multipart).await
}

async fn relay(
    state: AppState,
    endpoint: Endpoint,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let span = tracing::info_span!("relay", request_id = %request_id);

    async move {
        match relay_upload(&state, endpoint, &headers, multipart).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Relay failed with {}: {}", e.status_code(), e);
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Handle GET /api/quota
pub async fn handle_quota(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let used = state.quota.usage(&headers);
    Json(state.quota.status(used)).into_response()
}
