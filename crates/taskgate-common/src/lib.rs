pub mod chunk;
pub mod config;
pub mod error;
pub mod execution;
pub mod job;
pub mod quota;
pub mod telemetry;

pub use chunk::{Chunk, ChunkFailureKind, ChunkOutcome, ChunkResult};
pub use config::ExecutionConfig;
pub use error::ExecuteError;
pub use execution::{CacheMetadata, CachePolicy, CacheStatus, ExecutionRequest, ExecutionResponse};
pub use job::{Job, JobStatus};
pub use quota::{Admission, QuotaLimits};
