use std::sync::Arc;

use crate::config::Config;
use crate::limiter::store::MemoryCounterStore;
use crate::limiter::RateLimiter;
use crate::storage::FileStore;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Everything here is immutable after construction except what the counter
/// store and the storage namespace manage themselves.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Admission control over the shared counter store
    pub limiter: RateLimiter,
    /// Object storage root
    pub store: FileStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = FileStore::new(&config.storage.directory);
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        Self {
            config: Arc::new(config),
            limiter,
            store,
        }
    }
}
