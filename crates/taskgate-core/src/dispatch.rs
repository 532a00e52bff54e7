use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use taskgate_common::{ChunkFailureKind, ChunkOutcome, ExecutionConfig};

use crate::provider::ProviderInvoker;

/// Fans chunk prompts out to the provider with bounded parallelism and a
/// per-chunk timeout. One chunk failing or timing out never cancels its
/// siblings; the caller always gets exactly one outcome per prompt, in
/// chunk-index order.
pub struct ChunkDispatcher {
    invoker: Arc<dyn ProviderInvoker>,
    max_parallel: usize,
    chunk_timeout: Duration,
}

impl ChunkDispatcher {
    pub fn new(invoker: Arc<dyn ProviderInvoker>, config: &ExecutionConfig) -> Self {
        Self {
            invoker,
            max_parallel: config.max_parallel_chunks.max(1),
            chunk_timeout: config.chunk_timeout,
        }
    }

    pub async fn dispatch(
        &self,
        provider: &str,
        model: &str,
        prompts: Vec<String>,
    ) -> Vec<ChunkOutcome> {
        let total = prompts.len();
        if total == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for (index, prompt) in prompts.into_iter().enumerate() {
            let invoker = Arc::clone(&self.invoker);
            let semaphore = Arc::clone(&semaphore);
            let provider = provider.to_string();
            let model = model.to_string();
            let chunk_timeout = self.chunk_timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    // Only possible if the semaphore is closed, which we never do.
                    Err(error) => {
                        return ChunkOutcome::failure(
                            index,
                            error.to_string(),
                            ChunkFailureKind::Provider,
                        )
                    }
                };

                match tokio::time::timeout(chunk_timeout, invoker.invoke(&provider, &model, &prompt))
                    .await
                {
                    Ok(Ok(reply)) => {
                        debug!(index, tokens_used = reply.tokens_used, "chunk completed");
                        ChunkOutcome::success(index, reply.content, reply.tokens_used)
                    }
                    Ok(Err(error)) => {
                        warn!(index, error = %error, "chunk failed");
                        ChunkOutcome::failure(index, error.to_string(), ChunkFailureKind::Provider)
                    }
                    Err(_) => {
                        warn!(index, timeout_secs = chunk_timeout.as_secs(), "chunk timed out");
                        ChunkOutcome::failure(
                            index,
                            format!("timed out after {}s", chunk_timeout.as_secs()),
                            ChunkFailureKind::Timeout,
                        )
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => warn!(error = %error, "chunk task aborted"),
            }
        }

        // A panicked task loses its index; backfill so the contract of one
        // outcome per prompt holds.
        if outcomes.len() < total {
            let seen: HashSet<usize> = outcomes.iter().map(|o| o.index).collect();
            for index in 0..total {
                if !seen.contains(&index) {
                    outcomes.push(ChunkOutcome::failure(
                        index,
                        "chunk task aborted".to_string(),
                        ChunkFailureKind::Provider,
                    ));
                }
            }
        }

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderReply;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInvoker {
        delay: Duration,
        fail_when_contains: Option<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeInvoker {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail_when_contains: None,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing_on(marker: &str) -> Self {
            Self {
                fail_when_contains: Some(marker.to_string()),
                ..Self::new(Duration::ZERO)
            }
        }
    }

    #[async_trait]
    impl ProviderInvoker for FakeInvoker {
        async fn invoke(
            &self,
            _provider: &str,
            _model: &str,
            prompt: &str,
        ) -> anyhow::Result<ProviderReply> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(marker) = &self.fail_when_contains {
                if prompt.contains(marker) {
                    bail!("provider rejected prompt");
                }
            }
            Ok(ProviderReply {
                content: format!("echo: {prompt}"),
                tokens_used: prompt.len() as u64,
            })
        }
    }

    fn config(max_parallel: usize, timeout: Duration) -> ExecutionConfig {
        ExecutionConfig {
            max_parallel_chunks: max_parallel,
            chunk_timeout: timeout,
            ..ExecutionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_outcomes_are_index_ordered() {
        let invoker = Arc::new(FakeInvoker::new(Duration::from_millis(5)));
        let dispatcher = ChunkDispatcher::new(invoker, &config(4, Duration::from_secs(5)));

        let prompts: Vec<String> = (0..6).map(|i| format!("part {i}")).collect();
        let outcomes = dispatcher.dispatch("openai", "gpt-4o-mini", prompts).await;

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.index, i);
            assert_eq!(outcome.content(), Some(format!("echo: part {i}").as_str()));
        }
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let invoker = Arc::new(FakeInvoker::new(Duration::from_millis(30)));
        let dispatcher =
            ChunkDispatcher::new(Arc::clone(&invoker) as Arc<dyn ProviderInvoker>, &config(2, Duration::from_secs(5)));

        let prompts: Vec<String> = (0..8).map(|i| format!("part {i}")).collect();
        let outcomes = dispatcher.dispatch("openai", "gpt-4o-mini", prompts).await;

        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(|o| o.succeeded()));
        assert!(invoker.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_slow_chunk_times_out() {
        let invoker = Arc::new(FakeInvoker::new(Duration::from_millis(200)));
        let dispatcher = ChunkDispatcher::new(invoker, &config(4, Duration::from_millis(30)));

        let outcomes = dispatcher
            .dispatch("openai", "gpt-4o-mini", vec!["slow".to_string()])
            .await;

        assert_eq!(outcomes.len(), 1);
        match &outcomes[0].outcome {
            taskgate_common::ChunkResult::Failed { kind, .. } => {
                assert_eq!(*kind, ChunkFailureKind::Timeout);
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_cancel_siblings() {
        let invoker = Arc::new(FakeInvoker::failing_on("poison"));
        let dispatcher = ChunkDispatcher::new(invoker, &config(4, Duration::from_secs(5)));

        let prompts = vec![
            "part 0".to_string(),
            "poison pill".to_string(),
            "part 2".to_string(),
        ];
        let outcomes = dispatcher.dispatch("openai", "gpt-4o-mini", prompts).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].succeeded());
        assert!(!outcomes[1].succeeded());
        assert_eq!(outcomes[1].error(), Some("provider rejected prompt"));
        assert!(outcomes[2].succeeded());
    }

    #[tokio::test]
    async fn test_empty_dispatch_returns_nothing() {
        let invoker = Arc::new(FakeInvoker::new(Duration::ZERO));
        let dispatcher = ChunkDispatcher::new(invoker, &config(4, Duration::from_secs(5)));
        assert!(dispatcher.dispatch("openai", "gpt-4o-mini", vec![]).await.is_empty());
    }
}
