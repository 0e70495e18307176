//! JSON response envelopes shared by handlers and errors.

use serde::Serialize;

/// Error envelope rendered for every `ApiError`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

/// Success envelope for the upload route.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub uri: String,
    pub path: String,
    pub file_name: String,
    pub encryption_key: String,
}

/// Body of the unauthenticated /ping route.
#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub version: &'static str,
    pub max_size: u64,
}
