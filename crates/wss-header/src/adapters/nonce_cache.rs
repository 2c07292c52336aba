//! # In-Memory Nonce Cache
//!
//! Capacity- and time-bounded replay cache for a single listener.
//!
//! ## Design
//!
//! - Entries map nonce bytes to the instant they were first seen.
//! - Entries older than `caching_time_span` are purged lazily: on a full
//!   cache, and every `GC_INTERVAL` inserts.
//! - Check-and-insert happens under one `parking_lot::Mutex`, so two
//!   concurrent messages carrying the same nonce cannot both be accepted.
//! - A full cache fails with `NonceCacheError::Full` rather than evicting
//!   live entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::ConfigError;
use crate::domain::policy::NonceCacheConfig;
use crate::ports::outbound::{Clock, NonceCache, NonceCacheError};

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

struct CacheState {
    entries: HashMap<Vec<u8>, Duration>,
    inserts_since_gc: usize,
}

pub struct InMemoryNonceCache {
    config: NonceCacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl InMemoryNonceCache {
    /// Inserts between opportunistic purges.
    pub const GC_INTERVAL: usize = 1024;

    pub fn new(config: NonceCacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: NonceCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                inserts_since_gc: 0,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_live(&self, seen_at: Duration, now: Duration) -> bool {
        now.saturating_sub(seen_at) < self.config.caching_time_span
    }

    fn purge(&self, state: &mut CacheState, now: Duration) {
        let before = state.entries.len();
        let span = self.config.caching_time_span;
        state
            .entries
            .retain(|_, seen_at| now.saturating_sub(*seen_at) < span);
        state.inserts_since_gc = 0;
        debug!(
            purged = before - state.entries.len(),
            remaining = state.entries.len(),
            "Nonce cache purge"
        );
    }
}

impl NonceCache for InMemoryNonceCache {
    fn caching_time_span(&self) -> Duration {
        self.config.caching_time_span
    }

    fn cache_size(&self) -> usize {
        self.config.cache_size
    }

    fn try_add_nonce(&self, nonce: &[u8]) -> Result<bool, NonceCacheError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(&seen_at) = state.entries.get(nonce) {
            if self.is_live(seen_at, now) {
                return Ok(false);
            }
        }

        if state.entries.len() >= self.config.cache_size
            || state.inserts_since_gc >= Self::GC_INTERVAL
        {
            self.purge(&mut state, now);
        }
        if state.entries.len() >= self.config.cache_size && !state.entries.contains_key(nonce) {
            warn!(capacity = self.config.cache_size, "Nonce cache full");
            return Err(NonceCacheError::Full {
                capacity: self.config.cache_size,
            });
        }

        state.entries.insert(nonce.to_vec(), now);
        state.inserts_since_gc += 1;
        Ok(true)
    }

    fn check_nonce(&self, nonce: &[u8]) -> Result<bool, NonceCacheError> {
        let now = self.clock.now();
        let state = self.state.lock();
        Ok(state
            .entries
            .get(nonce)
            .is_some_and(|&seen_at| self.is_live(seen_at, now)))
    }
}
