use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use taskgate_common::{CacheMetadata, ExecutionConfig};
use taskgate_store::KeyValueStore;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Error,
}

/// Payload stored under a fingerprint. Carries enough request context to
/// reconstruct a response on a hit without re-running anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub content: String,
    pub outcome: OutcomeKind,
    pub job_id: String,
    pub agent: String,
    pub provider: String,
    pub model: String,
    pub chunks_processed: usize,
    pub cached_at: DateTime<Utc>,
}

/// Cache-aside store over a pluggable key-value backend.
///
/// Every backend error degrades instead of propagating: a failed lookup is
/// a miss, a failed store is a no-op, a failed lock acquisition counts as
/// acquired so the caller computes independently. Cache unavailability must
/// never fail a request.
pub struct ResultCache {
    store: Arc<dyn KeyValueStore>,
    success_ttl_secs: u64,
    error_ttl_secs: u64,
    lock_ttl_secs: u64,
    lock_wait: Duration,
    lock_poll: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &ExecutionConfig) -> Self {
        Self {
            store,
            success_ttl_secs: config.success_ttl_secs,
            error_ttl_secs: config.error_ttl_secs,
            lock_ttl_secs: config.lock_ttl_secs,
            lock_wait: config.lock_wait,
            lock_poll: config.lock_poll,
        }
    }

    pub async fn lookup(&self, fp: &Fingerprint) -> Option<(CachedResult, CacheMetadata)> {
        let bytes = match self.store.get(fp.as_key()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %fp, "cache miss");
                return None;
            }
            Err(error) => {
                warn!(key = %fp, error = %error, "cache backend unreachable, treating as miss");
                return None;
            }
        };

        let result: CachedResult = match serde_json::from_slice(&bytes) {
            Ok(result) => result,
            Err(error) => {
                warn!(key = %fp, error = %error, "corrupt cache entry, treating as miss");
                return None;
            }
        };

        let ttl_remaining = match self.store.ttl_remaining(fp.as_key()).await {
            Ok(ttl) => ttl,
            Err(error) => {
                warn!(key = %fp, error = %error, "failed to read entry ttl");
                None
            }
        };

        debug!(key = %fp, "cache hit");
        let metadata = CacheMetadata::hit(result.cached_at, ttl_remaining);
        Some((result, metadata))
    }

    /// Write a result through. Error outcomes always take the short error
    /// TTL; successful ones take the per-request override or the default.
    pub async fn store(&self, fp: &Fingerprint, result: &CachedResult, ttl_override: Option<u64>) {
        let ttl_secs = match result.outcome {
            OutcomeKind::Error => self.error_ttl_secs,
            OutcomeKind::Success => ttl_override.unwrap_or(self.success_ttl_secs),
        };

        let bytes = match serde_json::to_vec(result) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(key = %fp, error = %error, "failed to serialize cache entry");
                return;
            }
        };

        match self.store.set(fp.as_key(), bytes, ttl_secs).await {
            Ok(()) => debug!(key = %fp, ttl_secs, "cached result"),
            Err(error) => {
                warn!(key = %fp, error = %error, "cache backend unreachable, skipping write")
            }
        }
    }

    /// Try to become the single-flight leader for this fingerprint. The lock
    /// expires on its own so a crashed leader cannot wedge the key.
    /// Fail-open: a backend error counts as acquired.
    pub async fn try_acquire_flight(&self, fp: &Fingerprint) -> bool {
        match self.store.try_lock(&fp.lock_key(), self.lock_ttl_secs).await {
            Ok(acquired) => acquired,
            Err(error) => {
                warn!(key = %fp, error = %error, "lock backend unreachable, computing without single-flight");
                true
            }
        }
    }

    pub async fn release_flight(&self, fp: &Fingerprint) {
        if let Err(error) = self.store.unlock(&fp.lock_key()).await {
            warn!(key = %fp, error = %error, "failed to release single-flight lock");
        }
    }

    /// Wait for the in-flight leader to publish its result, re-running the
    /// lookup on every poll. `None` after the bounded wait means the caller
    /// should compute independently: duplicated work is preferred over an
    /// unavailable response.
    pub async fn await_result(&self, fp: &Fingerprint) -> Option<(CachedResult, CacheMetadata)> {
        let deadline = Instant::now() + self.lock_wait;
        while Instant::now() < deadline {
            tokio::time::sleep(self.lock_poll).await;
            if let Some(hit) = self.lookup(fp).await {
                return Some(hit);
            }
        }
        warn!(key = %fp, "timed out waiting for in-flight execution, computing independently");
        None
    }
}
