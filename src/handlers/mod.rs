//! HTTP handlers orchestrating admission control, allocation, encryption,
//! and MIME policy.

pub mod download;
pub mod misc;
pub mod upload;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::ApiError;

/// Detection reads at most this much plaintext.
pub(crate) const MIME_DETECT_PREFIX: usize = 8192;

/// Compare the Authorization header against the configured master key in
/// constant time. An empty configured key means public mode: every caller
/// is authorized (warned about at boot).
pub(crate) fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let master = config.security.master_key.as_bytes();
    if master.is_empty() {
        return Ok(());
    }

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if presented.as_bytes().ct_eq(master).into() {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Content-sniff a plaintext prefix. Types `infer` has no signature for
/// (plain text among them) fall back to the generic binary type.
pub(crate) fn detect_mime(prefix: &[u8]) -> &'static str {
    infer::get(prefix)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream")
}
