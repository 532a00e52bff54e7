use std::sync::Arc;

use tracing::{debug, info, warn};

use taskgate_common::{ChunkOutcome, Job, JobStatus};
use taskgate_store::JobStore;

/// Tracks job records through `created → processing → terminal`.
///
/// Bookkeeping never decides a request's fate: every store error is logged
/// and swallowed so a broken job table cannot take down executions.
pub struct JobTracker {
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, user_id: &str, agent: &str, provider: &str, model: &str) -> Job {
        let job = Job::new(user_id, agent, provider, model);
        if let Err(error) = self.store.insert(&job).await {
            warn!(job_id = %job.id, error = %error, "failed to persist new job");
        }
        info!(job_id = %job.id, user_id, agent, provider, model, "job created");
        job
    }

    pub async fn mark_processing(&self, job_id: &str) {
        if let Err(error) = self.store.update_status(job_id, JobStatus::Processing).await {
            warn!(job_id, error = %error, "failed to mark job processing");
        }
    }

    pub async fn record_chunk_outcome(&self, job_id: &str, outcome: &ChunkOutcome) {
        match outcome.error() {
            None => debug!(
                job_id,
                chunk = outcome.index,
                tokens_used = outcome.tokens_used(),
                "chunk succeeded"
            ),
            Some(error) => debug!(job_id, chunk = outcome.index, error, "chunk failed"),
        }
    }

    /// Terminal status implied by a set of chunk outcomes: completed iff
    /// everything succeeded, failed iff nothing did (including the empty
    /// set), partially completed otherwise.
    pub fn status_for_outcomes(outcomes: &[ChunkOutcome]) -> JobStatus {
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        if succeeded == outcomes.len() && !outcomes.is_empty() {
            JobStatus::Completed
        } else if succeeded == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyCompleted
        }
    }

    /// Move a job to a terminal status and record its final accounting.
    /// Finalizing an already-terminal job is a logged no-op, so retries and
    /// racing finalizers cannot rewrite history.
    pub async fn finalize(
        &self,
        job_id: &str,
        status: JobStatus,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
        chunk_count: u32,
    ) {
        debug_assert!(status.is_terminal());

        match self.store.fetch(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                info!(job_id, current = %job.status, requested = %status, "job already finalized");
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(job_id, error = %error, "failed to fetch job before finalizing");
            }
        }

        if let Err(error) = self.store.update_status(job_id, status).await {
            warn!(job_id, error = %error, "failed to finalize job status");
        }
        if let Err(error) = self
            .store
            .update_token_counts(job_id, input_tokens, output_tokens, duration_ms, chunk_count)
            .await
        {
            warn!(job_id, error = %error, "failed to record job token counts");
        }
        info!(
            job_id,
            status = %status,
            input_tokens,
            output_tokens,
            duration_ms,
            chunk_count,
            "job finalized"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use taskgate_common::ChunkFailureKind;
    use taskgate_store::MemoryJobStore;

    struct DownJobStore;

    #[async_trait]
    impl JobStore for DownJobStore {
        async fn insert(&self, _job: &Job) -> anyhow::Result<()> {
            bail!("database unavailable")
        }
        async fn update_status(&self, _job_id: &str, _status: JobStatus) -> anyhow::Result<()> {
            bail!("database unavailable")
        }
        async fn update_token_counts(
            &self,
            _job_id: &str,
            _input_tokens: u64,
            _output_tokens: u64,
            _duration_ms: u64,
            _chunk_count: u32,
        ) -> anyhow::Result<()> {
            bail!("database unavailable")
        }
        async fn fetch(&self, _job_id: &str) -> anyhow::Result<Option<Job>> {
            bail!("database unavailable")
        }
    }

    fn outcomes(results: &[bool]) -> Vec<ChunkOutcome> {
        results
            .iter()
            .enumerate()
            .map(|(i, ok)| {
                if *ok {
                    ChunkOutcome::success(i, format!("out {i}"), 10)
                } else {
                    ChunkOutcome::failure(i, "boom".to_string(), ChunkFailureKind::Provider)
                }
            })
            .collect()
    }

    #[test]
    fn test_status_for_outcomes() {
        assert_eq!(
            JobTracker::status_for_outcomes(&outcomes(&[true, true])),
            JobStatus::Completed
        );
        assert_eq!(
            JobTracker::status_for_outcomes(&outcomes(&[true, false])),
            JobStatus::PartiallyCompleted
        );
        assert_eq!(
            JobTracker::status_for_outcomes(&outcomes(&[false, false])),
            JobStatus::Failed
        );
        assert_eq!(JobTracker::status_for_outcomes(&[]), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_create_then_finalize() {
        let store = Arc::new(MemoryJobStore::new());
        let tracker = JobTracker::new(store.clone());

        let job = tracker.create("u1", "summarizer", "openai", "gpt-4o-mini").await;
        tracker.mark_processing(&job.id).await;
        tracker
            .finalize(&job.id, JobStatus::Completed, 100, 250, 1_234, 3)
            .await;

        let stored = store.fetch(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.input_tokens, 100);
        assert_eq!(stored.output_tokens, 250);
        assert_eq!(stored.duration_ms, Some(1_234));
        assert_eq!(stored.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let store = Arc::new(MemoryJobStore::new());
        let tracker = JobTracker::new(store.clone());

        let job = tracker.create("u1", "summarizer", "openai", "gpt-4o-mini").await;
        tracker
            .finalize(&job.id, JobStatus::Completed, 100, 250, 1_000, 1)
            .await;
        tracker.finalize(&job.id, JobStatus::Failed, 0, 0, 2_000, 9).await;

        let stored = store.fetch(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.input_tokens, 100);
        assert_eq!(stored.duration_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let tracker = JobTracker::new(Arc::new(DownJobStore));

        let job = tracker.create("u1", "summarizer", "openai", "gpt-4o-mini").await;
        tracker.mark_processing(&job.id).await;
        tracker
            .finalize(&job.id, JobStatus::Failed, 0, 0, 10, 0)
            .await;
        // Reaching this point without a panic is the assertion.
        assert_eq!(job.status, JobStatus::Created);
    }
}
