//! Small unauthenticated-adjacent routes: auth probe and server info.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::error::ApiError;
use crate::response::PingResponse;
use crate::state::AppState;

/// GET /check_auth — 204 when the presented master key is valid, so clients
/// can verify credentials without uploading anything.
pub async fn check_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    super::authorize(&state.config, &headers)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /ping — server version and upload size cap, for client preflight.
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        version: env!("CARGO_PKG_VERSION"),
        max_size: state.config.storage.max_size_bytes,
    })
}
