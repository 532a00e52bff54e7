pub mod cache;
pub mod chunker;
pub mod dispatch;
pub mod fingerprint;
pub mod jobs;
pub mod merge;
pub mod orchestrator;
pub mod provider;
pub mod quota;

pub use cache::{CachedResult, OutcomeKind, ResultCache};
pub use dispatch::ChunkDispatcher;
pub use fingerprint::Fingerprint;
pub use jobs::JobTracker;
pub use merge::{MergedResult, ReconcileExecutor, ResultMerger};
pub use orchestrator::Orchestrator;
pub use provider::{ProviderInvoker, ProviderReply};
pub use quota::QuotaTracker;
