use thiserror::Error;

/// Errors that terminate an execution request before the pipeline produces
/// a response. Cache and persistence failures never appear here: they are
/// recovered locally (fail-open / log-and-continue), and per-chunk provider
/// failures surface through the final job status instead.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// RPM or TPM quota exhausted. Carries the retry-after hint the outer
    /// layer maps to a too-many-requests response.
    #[error("rate limit exceeded: {reason}")]
    QuotaExceeded { retry_after_secs: u64, reason: String },

    /// Malformed request (missing required fields, empty message).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Pipeline precondition violated (e.g. the splitter produced zero
    /// chunks from a non-empty document). Not a recoverable runtime
    /// condition.
    #[error("internal pipeline error: {0}")]
    Internal(String),
}
