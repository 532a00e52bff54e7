use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecuteError;
use crate::job::JobStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Agent identifier (e.g. "text-summarizer")
    pub agent: String,

    /// Provider name (e.g. "openai"); opaque to the core
    pub provider: String,

    /// Model name (e.g. "gpt-4o-mini")
    pub model: String,

    /// Resolved user identity performing the request
    pub user_id: String,

    /// Message text, or the extracted plain text of an uploaded document
    pub message: String,

    /// Agent parameters; a BTreeMap keeps them key-sorted so that insertion
    /// order never leaks into the fingerprint
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default)]
    pub cache: CachePolicy,
}

impl ExecutionRequest {
    pub fn validate(&self) -> Result<(), ExecuteError> {
        if self.agent.is_empty() {
            return Err(ExecuteError::InvalidRequest("agent must not be empty".into()));
        }
        if self.provider.is_empty() {
            return Err(ExecuteError::InvalidRequest("provider must not be empty".into()));
        }
        if self.model.is_empty() {
            return Err(ExecuteError::InvalidRequest("model must not be empty".into()));
        }
        if self.user_id.is_empty() {
            return Err(ExecuteError::InvalidRequest("user_id must not be empty".into()));
        }
        if self.message.is_empty() {
            return Err(ExecuteError::InvalidRequest("message must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// When false, neither the lookup nor the write-back happens and the
    /// response is marked `bypassed`
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,

    /// When true, skip the lookup but still write the fresh result through
    #[serde(default)]
    pub force_refresh: bool,

    /// Per-request TTL override for successful results, in seconds
    #[serde(default)]
    pub ttl_override_secs: Option<u64>,
}

fn default_use_cache() -> bool {
    true
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            ttl_override_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypassed,
}

/// Cache resolution reported back to the caller on every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub status: CacheStatus,
    pub cached_at: Option<DateTime<Utc>>,
    pub ttl_remaining_secs: Option<u64>,
}

impl CacheMetadata {
    pub fn miss() -> Self {
        Self {
            status: CacheStatus::Miss,
            cached_at: None,
            ttl_remaining_secs: None,
        }
    }

    pub fn bypassed() -> Self {
        Self {
            status: CacheStatus::Bypassed,
            cached_at: None,
            ttl_remaining_secs: None,
        }
    }

    pub fn hit(cached_at: DateTime<Utc>, ttl_remaining_secs: Option<u64>) -> Self {
        Self {
            status: CacheStatus::Hit,
            cached_at: Some(cached_at),
            ttl_remaining_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub job_id: String,
    pub agent: String,
    pub provider: String,
    pub model: String,
    pub status: JobStatus,
    pub content: String,
    pub chunks_processed: usize,
    pub tokens_used: u64,
    pub cache: CacheMetadata,
}
