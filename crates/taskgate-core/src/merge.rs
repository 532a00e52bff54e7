use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use taskgate_common::{
    CachePolicy, ChunkOutcome, ExecutionRequest, JobStatus, QuotaLimits,
};

use crate::jobs::JobTracker;

/// Capability used by the merger to run the reconciliation call as a
/// first-class single-shot execution (through quota and cache, never
/// re-chunked). Implemented by the orchestrator.
#[async_trait]
pub trait ReconcileExecutor: Send + Sync {
    async fn execute_single(
        &self,
        request: ExecutionRequest,
        limits: QuotaLimits,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedResult {
    pub status: JobStatus,
    pub content: String,
}

/// Combines per-chunk outcomes into one document.
///
/// All-success multi-chunk results are reconciled by the model itself; if
/// that call fails for any reason the merger degrades to structured
/// concatenation rather than failing a job whose chunks all succeeded.
pub struct ResultMerger;

impl ResultMerger {
    pub async fn merge(
        request: &ExecutionRequest,
        outcomes: &[ChunkOutcome],
        executor: &dyn ReconcileExecutor,
        limits: QuotaLimits,
    ) -> MergedResult {
        let status = JobTracker::status_for_outcomes(outcomes);

        match status {
            JobStatus::Completed => {
                if outcomes.len() == 1 {
                    return MergedResult {
                        status,
                        content: outcomes[0].content().unwrap_or_default().to_string(),
                    };
                }

                let sections: Vec<&str> =
                    outcomes.iter().filter_map(|o| o.content()).collect();
                let content = Self::reconcile(request, &sections, executor, limits).await;
                MergedResult { status, content }
            }
            JobStatus::PartiallyCompleted => MergedResult {
                status,
                content: Self::partial_document(&request.agent, outcomes),
            },
            // All chunks failed; there is nothing to present.
            _ => MergedResult {
                status: JobStatus::Failed,
                content: String::new(),
            },
        }
    }

    async fn reconcile(
        request: &ExecutionRequest,
        sections: &[&str],
        executor: &dyn ReconcileExecutor,
        limits: QuotaLimits,
    ) -> String {
        let reconcile_request = ExecutionRequest {
            agent: request.agent.clone(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            user_id: request.user_id.clone(),
            message: Self::reconciliation_prompt(&request.agent, sections),
            parameters: BTreeMap::new(),
            cache: CachePolicy::default(),
        };

        match executor.execute_single(reconcile_request, limits).await {
            Ok(content) => {
                debug!(sections = sections.len(), "reconciled chunk results");
                content
            }
            Err(error) => {
                warn!(error = %error, "reconciliation failed, falling back to concatenation");
                Self::concatenate(&request.agent, sections)
            }
        }
    }

    fn reconciliation_prompt(agent: &str, sections: &[&str]) -> String {
        let mut prompt = format!(
            "You are an expert at synthesizing and merging analysis results.\n\n\
             Your task is to combine the following analysis results from different \
             sections of a document into a coherent, comprehensive final report.\n\n\
             The original analysis was performed by: {agent}\n\n\
             Please merge these section results into a unified, well-structured \
             final analysis:\n"
        );
        for (i, section) in sections.iter().enumerate() {
            prompt.push_str(&format!("\n--- Section {} ---\n{}\n", i + 1, section));
        }
        prompt.push_str(
            "\nPlease provide a comprehensive merged analysis that:\n\
             1. Synthesizes key findings across all sections\n\
             2. Identifies common themes and patterns\n\
             3. Resolves any contradictions between sections\n\
             4. Provides a coherent final conclusion\n\n\
             Format your response as a well-structured report.",
        );
        prompt
    }

    /// Plain structural merge used when the reconciliation call is
    /// unavailable. Keeps every section verbatim.
    fn concatenate(agent: &str, sections: &[&str]) -> String {
        let mut merged = format!("# {agent} Analysis Results\n\n");
        merged.push_str(&format!(
            "This document was processed in {} parts. Below are the consolidated results:\n\n",
            sections.len()
        ));
        for (i, section) in sections.iter().enumerate() {
            merged.push_str(&format!("## Section {} Results\n\n{}\n\n", i + 1, section));
        }
        merged.push_str("## Overall Summary\n\n");
        merged.push_str(
            "The document has been analyzed in multiple sections. \
             Please review each section above for detailed findings. ",
        );
        merged.push_str(&format!("Total sections processed: {}\n", sections.len()));
        merged
    }

    /// Document built when some chunks failed: successful sections in
    /// index order, failed sections flagged in place.
    fn partial_document(agent: &str, outcomes: &[ChunkOutcome]) -> String {
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let mut merged = format!("# {agent} Analysis Results (partial)\n\n");
        merged.push_str(&format!(
            "{} of {} sections completed. Failed sections are marked below.\n\n",
            succeeded,
            outcomes.len()
        ));
        for outcome in outcomes {
            merged.push_str(&format!("## Section {}\n\n", outcome.index + 1));
            match outcome.content() {
                Some(content) => merged.push_str(&format!("{content}\n\n")),
                None => merged.push_str(&format!(
                    "[Section {} failed: {}]\n\n",
                    outcome.index + 1,
                    outcome.error().unwrap_or("unknown error")
                )),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use taskgate_common::ChunkFailureKind;

    struct StubExecutor {
        reply: Option<String>,
        calls: AtomicUsize,
        last_message: Mutex<Option<String>>,
    }

    impl StubExecutor {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
                last_message: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
                last_message: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ReconcileExecutor for StubExecutor {
        async fn execute_single(
            &self,
            request: ExecutionRequest,
            _limits: QuotaLimits,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_message.lock().unwrap() = Some(request.message);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => bail!("reconciliation provider unavailable"),
            }
        }
    }

    fn make_request() -> ExecutionRequest {
        ExecutionRequest {
            agent: "summarizer".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            user_id: "u1".to_string(),
            message: "irrelevant here".to_string(),
            parameters: BTreeMap::new(),
            cache: CachePolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_single_success_passes_through() {
        let executor = StubExecutor::replying("should not be used");
        let outcomes = vec![ChunkOutcome::success(0, "the only answer".to_string(), 10)];

        let merged = ResultMerger::merge(
            &make_request(),
            &outcomes,
            &executor,
            QuotaLimits::default(),
        )
        .await;

        assert_eq!(merged.status, JobStatus::Completed);
        assert_eq!(merged.content, "the only answer");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_success_reconciles_once() {
        let executor = StubExecutor::replying("unified report");
        let outcomes = vec![
            ChunkOutcome::success(0, "first findings".to_string(), 10),
            ChunkOutcome::success(1, "second findings".to_string(), 10),
        ];

        let merged = ResultMerger::merge(
            &make_request(),
            &outcomes,
            &executor,
            QuotaLimits::default(),
        )
        .await;

        assert_eq!(merged.status, JobStatus::Completed);
        assert_eq!(merged.content, "unified report");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let prompt = executor.last_message.lock().unwrap().take().unwrap();
        assert!(prompt.contains("--- Section 1 ---"));
        assert!(prompt.contains("first findings"));
        assert!(prompt.contains("--- Section 2 ---"));
        assert!(prompt.contains("second findings"));
        assert!(prompt.contains("summarizer"));
    }

    #[tokio::test]
    async fn test_reconcile_failure_falls_back_to_concatenation() {
        let executor = StubExecutor::failing();
        let outcomes = vec![
            ChunkOutcome::success(0, "first findings".to_string(), 10),
            ChunkOutcome::success(1, "second findings".to_string(), 10),
        ];

        let merged = ResultMerger::merge(
            &make_request(),
            &outcomes,
            &executor,
            QuotaLimits::default(),
        )
        .await;

        assert_eq!(merged.status, JobStatus::Completed);
        assert!(merged.content.contains("# summarizer Analysis Results"));
        assert!(merged.content.contains("## Section 1 Results"));
        assert!(merged.content.contains("first findings"));
        assert!(merged.content.contains("## Section 2 Results"));
        assert!(merged.content.contains("Total sections processed: 2"));
    }

    #[tokio::test]
    async fn test_mixed_outcomes_build_partial_document() {
        let executor = StubExecutor::replying("should not be used");
        let outcomes = vec![
            ChunkOutcome::success(0, "first findings".to_string(), 10),
            ChunkOutcome::failure(1, "timed out after 120s".to_string(), ChunkFailureKind::Timeout),
            ChunkOutcome::success(2, "third findings".to_string(), 10),
        ];

        let merged = ResultMerger::merge(
            &make_request(),
            &outcomes,
            &executor,
            QuotaLimits::default(),
        )
        .await;

        assert_eq!(merged.status, JobStatus::PartiallyCompleted);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert!(merged.content.contains("2 of 3 sections completed"));
        assert!(merged.content.contains("first findings"));
        assert!(merged.content.contains("[Section 2 failed: timed out after 120s]"));
        assert!(merged.content.contains("third findings"));

        let first = merged.content.find("first findings").unwrap();
        let second = merged.content.find("[Section 2 failed").unwrap();
        let third = merged.content.find("third findings").unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_all_failed_yields_failed_with_no_content() {
        let executor = StubExecutor::replying("should not be used");
        let outcomes = vec![
            ChunkOutcome::failure(0, "boom".to_string(), ChunkFailureKind::Provider),
            ChunkOutcome::failure(1, "boom".to_string(), ChunkFailureKind::Provider),
        ];

        let merged = ResultMerger::merge(
            &make_request(),
            &outcomes,
            &executor,
            QuotaLimits::default(),
        )
        .await;

        assert_eq!(merged.status, JobStatus::Failed);
        assert!(merged.content.is_empty());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }
}
