use std::time::Duration;

use crate::quota::QuotaLimits;

/// Tunables for the execution core. Constructed once and passed into the
/// component constructors; never read from globals after startup.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Limits applied when the resolved user carries none of its own.
    pub default_limits: QuotaLimits,

    /// TTL for cached successful results.
    pub success_ttl_secs: u64,

    /// Short TTL for cached failures, dampening retry storms against a
    /// failing provider without poisoning the cache for long.
    pub error_ttl_secs: u64,

    /// Maximum chunk size in characters for document splitting.
    pub chunk_size: usize,

    /// Characters copied from the tail of chunk k onto the head of chunk k+1.
    pub chunk_overlap: usize,

    /// Fan-out bound for concurrent chunk dispatch.
    pub max_parallel_chunks: usize,

    /// Deadline for a single provider invocation (per chunk and for
    /// single-message requests alike).
    pub chunk_timeout: Duration,

    /// How long a contending caller waits for the single-flight leader
    /// before computing independently.
    pub lock_wait: Duration,

    /// Poll interval while waiting on the single-flight leader.
    pub lock_poll: Duration,

    /// TTL on the single-flight lock key, so a crashed leader cannot wedge
    /// the fingerprint.
    pub lock_ttl_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_limits: QuotaLimits::default(),
            success_ttl_secs: 21_600,
            error_ttl_secs: 60,
            chunk_size: 4_000,
            chunk_overlap: 200,
            max_parallel_chunks: 4,
            chunk_timeout: Duration::from_secs(120),
            lock_wait: Duration::from_secs(30),
            lock_poll: Duration::from_millis(500),
            lock_ttl_secs: 30,
        }
    }
}

impl ExecutionConfig {
    /// Build a config from `TASKGATE_*` environment variables, falling back
    /// to the documented defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_limits: QuotaLimits {
                rpm_limit: env_parse("TASKGATE_RPM_LIMIT", defaults.default_limits.rpm_limit),
                tpm_limit: env_parse("TASKGATE_TPM_LIMIT", defaults.default_limits.tpm_limit),
            },
            success_ttl_secs: env_parse("TASKGATE_CACHE_TTL_SECS", defaults.success_ttl_secs),
            error_ttl_secs: env_parse("TASKGATE_CACHE_ERROR_TTL_SECS", defaults.error_ttl_secs),
            chunk_size: env_parse("TASKGATE_CHUNK_SIZE", defaults.chunk_size),
            chunk_overlap: env_parse("TASKGATE_CHUNK_OVERLAP", defaults.chunk_overlap),
            max_parallel_chunks: env_parse(
                "TASKGATE_MAX_PARALLEL_CHUNKS",
                defaults.max_parallel_chunks,
            ),
            chunk_timeout: Duration::from_secs(env_parse(
                "TASKGATE_CHUNK_TIMEOUT_SECS",
                defaults.chunk_timeout.as_secs(),
            )),
            lock_wait: Duration::from_secs(env_parse(
                "TASKGATE_LOCK_WAIT_SECS",
                defaults.lock_wait.as_secs(),
            )),
            lock_poll: Duration::from_millis(env_parse(
                "TASKGATE_LOCK_POLL_MS",
                defaults.lock_poll.as_millis() as u64,
            )),
            lock_ttl_secs: env_parse("TASKGATE_LOCK_TTL_SECS", defaults.lock_ttl_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
