//! Request-boundary error taxonomy.
//!
//! Every failure a handler can hit is converted into one of these variants
//! and rendered as a structured JSON response; nothing here ever crashes the
//! process. Wrong-key and corrupted-data decryption failures are deliberately
//! a single variant so callers cannot tell them apart.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::response::ErrorBody;

/// Errors surfaced to callers at the request boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or incorrect master key on an authenticated route.
    #[error("Not authorized.")]
    Unauthorized,

    /// Admission control denied the request; the message names the limit
    /// class (global, route, bandwidth) but never other callers' usage.
    #[error("You are being rate limited. ({0})")]
    RateLimited(String),

    /// The request itself is malformed or not acceptable.
    #[error("{0}")]
    Validation(String),

    /// The object does not exist (or is not a file — indistinguishable).
    #[error("Not found.")]
    NotFound,

    /// Authenticated decryption failed: wrong key or corrupted data,
    /// conflated by design.
    #[error("Invalid encryption key, or the file is corrupted.")]
    InvalidKey,

    /// The identifier allocator ran out of collision retries. A
    /// configuration problem (identifier length too short), surfaced to the
    /// caller as an internal error.
    #[error("Tried too many times to find an unoccupied file ID. Consider increasing the ID length.")]
    ResourceExhausted,

    /// Storage I/O, counter store, or encryption-primitive failure.
    #[error("Internal server error.")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) | ApiError::InvalidKey => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ResourceExhausted | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // The detail behind an internal error stays in the log, not the body.
        if let ApiError::Internal(detail) = &self {
            tracing::error!("internal error: {}", detail);
        }

        let body = ErrorBody {
            status: "error",
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<crate::limiter::store::StoreError> for ApiError {
    fn from(err: crate::limiter::store::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("storage I/O failure: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_distinguish_failure_classes() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::RateLimited("global".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::InvalidKey.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Internal("disk on fire".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_never_reaches_the_message() {
        let message = ApiError::Internal("secret backend detail".into()).to_string();
        assert_eq!(message, "Internal server error.");
    }
}
