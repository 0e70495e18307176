//! Counter store backing the rate limiter.
//!
//! The limiter only needs two operations from its store: a point read and an
//! increment that sets the window expiry when (and only when) the counter is
//! created. The trait keeps the store swappable for a networked one; the
//! in-process implementation keeps each increment a single map transaction so
//! concurrent callers touching the same scope never lose updates.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by a counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counter store consulted by admission control.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the current value for `key`. Expired counters are absent.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Add `weight` to the counter for `key` as a single transaction,
    /// setting its expiry to `window` from now only if the counter did not
    /// already exist. Subsequent increments within the window never extend
    /// it (fixed-window semantics).
    async fn incr_and_expire(
        &self,
        key: &str,
        weight: i64,
        window: Duration,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: i64,
    expires_at: Instant,
}

impl CounterEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process counter store over a concurrent map.
///
/// Entries past their expiry are treated as absent on read and replaced
/// wholesale on write; nothing evicts them eagerly, which matches the
/// contract that an expired counter is only *logically* gone.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value))
    }

    async fn incr_and_expire(
        &self,
        key: &str,
        weight: i64,
        window: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expired(now) {
                    // A stale entry counts as newly created: fresh window.
                    *entry = CounterEntry {
                        value: weight,
                        expires_at: now + window,
                    };
                } else {
                    entry.value += weight;
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    value: weight,
                    expires_at: now + window,
                });
            }
        }
        Ok(())
    }
}
