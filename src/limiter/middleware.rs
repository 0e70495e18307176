//! Request-count admission middleware.
//!
//! Applied to every route: the global limit is checked first, then the
//! upload route's own limit. Bandwidth limits are weighted by byte counts
//! only the handlers know, so those checks live in the handlers themselves.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

use super::{global_scope, upload_scope};

/// Header carrying the original client IP when fronted by Cloudflare.
const FORWARDED_IP_HEADER: &str = "cf-connecting-ip";

/// Resolve the caller's IP: the Cloudflare forwarded header when present,
/// the socket peer address otherwise.
pub fn client_ip(headers: &HeaderMap, addr: Option<&SocketAddr>) -> String {
    if let Some(forwarded) = headers.get(FORWARDED_IP_HEADER).and_then(|v| v.to_str().ok()) {
        if !forwarded.is_empty() {
            return forwarded.to_string();
        }
    }
    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reject the request before any handler work when the caller is over its
/// request-count quota.
pub async fn limit_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), addr.as_ref());

    let limits = &state.config.rate_limit;

    let global_ok = state
        .limiter
        .try_acquire(&global_scope(&ip), limits.global, limits.reset_after_ms, 1)
        .await?;
    if !global_ok {
        return Err(ApiError::RateLimited("global".to_string()));
    }

    if request.uri().path() == "/upload" {
        let upload_ok = state
            .limiter
            .try_acquire(&upload_scope(&ip), limits.upload, limits.reset_after_ms, 1)
            .await?;
        if !upload_ok {
            return Err(ApiError::RateLimited("route: upload".to_string()));
        }
    }

    Ok(next.run(request).await)
}
