//! Route table and middleware stack.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::handlers::{download, misc, upload};
use crate::limiter;
use crate::state::AppState;

/// Multipart framing allowance on top of the configured object size cap.
const BODY_LIMIT_SLACK: usize = 2048;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.storage.max_size_bytes as usize + BODY_LIMIT_SLACK;

    Router::new()
        .route("/upload", post(upload::serve_upload))
        .route("/check_auth", get(misc::check_auth))
        .route("/ping", get(misc::ping))
        // Everything else is treated as an object retrieval path.
        .fallback(download::serve_file)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limiter::middleware::limit_request,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
