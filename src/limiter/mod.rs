//! Fixed-window admission control over a shared counter store.
//!
//! Every handler consults the limiter before doing expensive work. The same
//! primitive serves request-count limits (weight 1 per request) and bandwidth
//! limits (weight = bytes about to be transferred); independent limits are
//! kept apart by composing the scope key from a classifier tag and the
//! caller's IP.

pub mod middleware;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use store::{CounterStore, StoreError};

/// Scope key for the global request-count limit.
pub fn global_scope(ip: &str) -> String {
    format!("G_{ip}")
}

/// Scope key for the upload route request-count limit.
pub fn upload_scope(ip: &str) -> String {
    format!("U_{ip}")
}

/// Scope key for the upload bandwidth limit.
pub fn bandwidth_upload_scope(ip: &str) -> String {
    format!("BW_UP_{ip}")
}

/// Scope key for the download bandwidth limit.
pub fn bandwidth_download_scope(ip: &str) -> String {
    format!("BW_DN_{ip}")
}

/// Admission control front end shared by all handlers.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Check whether `weight` more units fit under `max_weight` within the
    /// current window for `scope`, incrementing the counter if they do.
    ///
    /// Returns `Ok(false)` without mutating state when the counter has
    /// already reached `max_weight`. A `max_weight <= 0` or
    /// `window_ms <= 0` configuration disables the limit entirely and the
    /// store is never touched.
    ///
    /// The read and the increment are two store operations, not one
    /// compare-and-swap: two callers can both observe "under limit" and both
    /// increment, transiently exceeding `max_weight` by one concurrent batch.
    /// This is an accepted soft-limit behavior, not a hard cap.
    pub async fn try_acquire(
        &self,
        scope: &str,
        max_weight: i64,
        window_ms: i64,
        weight: i64,
    ) -> Result<bool, StoreError> {
        if max_weight <= 0 || window_ms <= 0 {
            return Ok(true);
        }

        if let Some(current) = self.store.get(scope).await? {
            if current >= max_weight {
                return Ok(false);
            }
        }

        self.store
            .incr_and_expire(scope, weight, Duration::from_millis(window_ms as u64))
            .await?;

        Ok(true)
    }
}
