use anyhow::Result;
use async_trait::async_trait;

/// Content and usage returned by one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub content: String,
    pub tokens_used: u64,
}

/// Capability that reaches whatever concrete AI vendor is configured.
/// The core is agnostic to the wire protocol behind it; implementations
/// live with the HTTP/provider plumbing outside this workspace.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    async fn invoke(&self, provider: &str, model: &str, prompt: &str) -> Result<ProviderReply>;
}
