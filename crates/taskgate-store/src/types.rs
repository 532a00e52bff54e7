use anyhow::Result;
use async_trait::async_trait;

use taskgate_common::{Job, JobStatus};

/// Pluggable key-value backend used by the result cache. Implementations
/// are expected to be remote (Redis or similar); the core treats every
/// error as a transient outage and fails open.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remaining lifetime of `key` in seconds. `None` when the key is
    /// absent or carries no expiry.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<u64>>;

    /// Acquire an expiring advisory lock. Returns `false` when another
    /// holder owns a live lock on `key`.
    async fn try_lock(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    async fn unlock(&self, key: &str) -> Result<()>;

    /// Delete all keys starting with `prefix`; returns the number removed.
    async fn clear(&self, prefix: &str) -> Result<u64>;
}

/// Durable storage for job records. Bookkeeping is best-effort relative to
/// the user-visible response: callers log failures and continue.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()>;

    async fn update_token_counts(
        &self,
        job_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
        chunk_count: u32,
    ) -> Result<()>;

    async fn fetch(&self, job_id: &str) -> Result<Option<Job>>;
}
