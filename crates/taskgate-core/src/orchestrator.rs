use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use taskgate_common::{
    Admission, CacheMetadata, Chunk, ExecuteError, ExecutionConfig, ExecutionRequest,
    ExecutionResponse, Job, JobStatus, QuotaLimits,
};
use taskgate_store::{JobStore, KeyValueStore};

use crate::cache::{CachedResult, OutcomeKind, ResultCache};
use crate::chunker;
use crate::dispatch::ChunkDispatcher;
use crate::fingerprint::{self, Fingerprint};
use crate::jobs::JobTracker;
use crate::merge::{ReconcileExecutor, ResultMerger};
use crate::provider::ProviderInvoker;
use crate::quota::QuotaTracker;

/// Everything the pipeline produced for one execution, before it is
/// wrapped in a response or cached.
struct PipelineOutput {
    status: JobStatus,
    content: String,
    chunks_processed: usize,
    output_tokens: u64,
}

/// Front door of the execution core. Owns the quota tracker, result cache,
/// job tracker and chunk dispatcher, and wires a request through them:
/// validate, admit, resolve against the cache, compute on a miss, merge,
/// account, finalize.
///
/// Provider failures never surface as `Err`; they become `Failed` or
/// `PartiallyCompleted` responses with a job record behind them. `Err` is
/// reserved for requests that were never executed at all.
pub struct Orchestrator {
    config: ExecutionConfig,
    quota: QuotaTracker,
    cache: ResultCache,
    jobs: JobTracker,
    invoker: Arc<dyn ProviderInvoker>,
    dispatcher: ChunkDispatcher,
}

impl Orchestrator {
    pub fn new(
        config: ExecutionConfig,
        kv_store: Arc<dyn KeyValueStore>,
        job_store: Arc<dyn JobStore>,
        invoker: Arc<dyn ProviderInvoker>,
    ) -> Self {
        Self {
            quota: QuotaTracker::new(),
            cache: ResultCache::new(kv_store, &config),
            jobs: JobTracker::new(job_store),
            dispatcher: ChunkDispatcher::new(Arc::clone(&invoker), &config),
            invoker,
            config,
        }
    }

    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResponse, ExecuteError> {
        let limits = self.config.default_limits;
        self.execute_with_limits(request, limits).await
    }

    /// Execute under caller-supplied limits, for users carrying their own
    /// quota configuration.
    pub async fn execute_with_limits(
        &self,
        request: ExecutionRequest,
        limits: QuotaLimits,
    ) -> Result<ExecutionResponse, ExecuteError> {
        self.run(request, limits, true).await
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        limits: QuotaLimits,
        allow_chunking: bool,
    ) -> Result<ExecutionResponse, ExecuteError> {
        request.validate()?;

        if let Admission::Denied {
            retry_after_secs,
            reason,
        } = self.quota.admit(&request.user_id, limits)
        {
            return Err(ExecuteError::QuotaExceeded {
                retry_after_secs,
                reason,
            });
        }

        let input_estimate = QuotaTracker::estimate_tokens(&request.message);
        if let Admission::Denied {
            retry_after_secs,
            reason,
        } = self.quota.admit_tokens(&request.user_id, limits, input_estimate)
        {
            return Err(ExecuteError::QuotaExceeded {
                retry_after_secs,
                reason,
            });
        }

        let started = Instant::now();
        let job = self
            .jobs
            .create(&request.user_id, &request.agent, &request.provider, &request.model)
            .await;

        if !request.cache.use_cache {
            let output = self
                .run_pipeline(&request, &job.id, limits, allow_chunking)
                .await;
            self.account_and_finalize(&request, &job, &output, input_estimate, started)
                .await;
            return Ok(Self::response(
                &job,
                output,
                input_estimate,
                CacheMetadata::bypassed(),
            ));
        }

        let fp = fingerprint::build(&request);

        if !request.cache.force_refresh {
            if let Some((cached, metadata)) = self.cache.lookup(&fp).await {
                return Ok(self.hit_response(&job, cached, metadata, started).await);
            }
        }

        let leader = self.cache.try_acquire_flight(&fp).await;
        if !leader && !request.cache.force_refresh {
            if let Some((cached, metadata)) = self.cache.await_result(&fp).await {
                return Ok(self.hit_response(&job, cached, metadata, started).await);
            }
        }

        let output = self
            .run_pipeline(&request, &job.id, limits, allow_chunking)
            .await;

        self.store_result(&request, &job, &fp, &output).await;
        if leader {
            self.cache.release_flight(&fp).await;
        }

        self.account_and_finalize(&request, &job, &output, input_estimate, started)
            .await;
        Ok(Self::response(
            &job,
            output,
            input_estimate,
            CacheMetadata::miss(),
        ))
    }

    /// The compute path: split when the message warrants it, fan out,
    /// merge; otherwise one timeout-bounded provider call.
    async fn run_pipeline(
        &self,
        request: &ExecutionRequest,
        job_id: &str,
        limits: QuotaLimits,
        allow_chunking: bool,
    ) -> PipelineOutput {
        self.jobs.mark_processing(job_id).await;

        if allow_chunking && request.message.len() > self.config.chunk_size {
            return self.run_chunked(request, job_id, limits).await;
        }

        let timeout = self.config.chunk_timeout;
        match tokio::time::timeout(
            timeout,
            self.invoker
                .invoke(&request.provider, &request.model, &request.message),
        )
        .await
        {
            Ok(Ok(reply)) => PipelineOutput {
                status: JobStatus::Completed,
                content: reply.content,
                chunks_processed: 1,
                output_tokens: reply.tokens_used,
            },
            Ok(Err(error)) => {
                warn!(job_id, error = %error, "provider call failed");
                PipelineOutput {
                    status: JobStatus::Failed,
                    content: error.to_string(),
                    chunks_processed: 1,
                    output_tokens: 0,
                }
            }
            Err(_) => {
                warn!(job_id, timeout_secs = timeout.as_secs(), "provider call timed out");
                PipelineOutput {
                    status: JobStatus::Failed,
                    content: format!("timed out after {}s", timeout.as_secs()),
                    chunks_processed: 1,
                    output_tokens: 0,
                }
            }
        }
    }

    async fn run_chunked(
        &self,
        request: &ExecutionRequest,
        job_id: &str,
        limits: QuotaLimits,
    ) -> PipelineOutput {
        let chunks = chunker::split(
            &request.message,
            self.config.chunk_size,
            self.config.chunk_overlap,
        );
        let total = chunks.len();
        info!(job_id, chunks = total, "dispatching chunked execution");

        let prompts: Vec<String> = chunks
            .iter()
            .map(|chunk| Self::chunk_prompt(chunk, total))
            .collect();
        let outcomes = self
            .dispatcher
            .dispatch(&request.provider, &request.model, prompts)
            .await;
        for outcome in &outcomes {
            self.jobs.record_chunk_outcome(job_id, outcome).await;
        }

        let output_tokens: u64 = outcomes.iter().map(|o| o.tokens_used()).sum();
        let merged = ResultMerger::merge(request, &outcomes, self, limits).await;

        PipelineOutput {
            status: merged.status,
            content: merged.content,
            chunks_processed: total,
            output_tokens,
        }
    }

    fn chunk_prompt(chunk: &Chunk, total: usize) -> String {
        format!(
            "This is part {} of {} of a larger document.\n\n\
             Please analyze this section and provide insights that can be \
             combined with other sections:\n\n\
             Document content:\n{}",
            chunk.index + 1,
            total,
            chunk.text
        )
    }

    /// Write the result through for future hits. Partial results are not
    /// cached: a retry may well complete fully, and replaying a partial
    /// document from cache would pin the failure.
    async fn store_result(
        &self,
        request: &ExecutionRequest,
        job: &Job,
        fp: &Fingerprint,
        output: &PipelineOutput,
    ) {
        let outcome = match output.status {
            JobStatus::Completed => OutcomeKind::Success,
            JobStatus::Failed => OutcomeKind::Error,
            _ => return,
        };
        let result = CachedResult {
            content: output.content.clone(),
            outcome,
            job_id: job.id.clone(),
            agent: job.agent.clone(),
            provider: job.provider.clone(),
            model: job.model.clone(),
            chunks_processed: output.chunks_processed,
            cached_at: Utc::now(),
        };
        self.cache
            .store(fp, &result, request.cache.ttl_override_secs)
            .await;
    }

    async fn account_and_finalize(
        &self,
        request: &ExecutionRequest,
        job: &Job,
        output: &PipelineOutput,
        input_estimate: u64,
        started: Instant,
    ) {
        self.quota.record_tokens(
            &request.user_id,
            input_estimate.saturating_add(output.output_tokens),
        );
        self.jobs
            .finalize(
                &job.id,
                output.status,
                input_estimate,
                output.output_tokens,
                started.elapsed().as_millis() as u64,
                output.chunks_processed as u32,
            )
            .await;
    }

    async fn hit_response(
        &self,
        job: &Job,
        cached: CachedResult,
        metadata: CacheMetadata,
        started: Instant,
    ) -> ExecutionResponse {
        let status = match cached.outcome {
            OutcomeKind::Success => JobStatus::Completed,
            OutcomeKind::Error => JobStatus::Failed,
        };
        info!(job_id = %job.id, original_job = %cached.job_id, "served from cache");
        self.jobs
            .finalize(
                &job.id,
                status,
                0,
                0,
                started.elapsed().as_millis() as u64,
                cached.chunks_processed as u32,
            )
            .await;

        ExecutionResponse {
            job_id: job.id.clone(),
            agent: job.agent.clone(),
            provider: job.provider.clone(),
            model: job.model.clone(),
            status,
            content: cached.content,
            chunks_processed: cached.chunks_processed,
            tokens_used: 0,
            cache: metadata,
        }
    }

    fn response(
        job: &Job,
        output: PipelineOutput,
        input_estimate: u64,
        cache: CacheMetadata,
    ) -> ExecutionResponse {
        ExecutionResponse {
            job_id: job.id.clone(),
            agent: job.agent.clone(),
            provider: job.provider.clone(),
            model: job.model.clone(),
            status: output.status,
            content: output.content,
            chunks_processed: output.chunks_processed,
            tokens_used: input_estimate.saturating_add(output.output_tokens),
            cache,
        }
    }
}

#[async_trait]
impl ReconcileExecutor for Orchestrator {
    /// Reconciliation runs as a first-class single-shot request: it passes
    /// quota admission and the cache like anything else, but never
    /// re-chunks, which bounds the recursion at one level.
    async fn execute_single(
        &self,
        request: ExecutionRequest,
        limits: QuotaLimits,
    ) -> anyhow::Result<String> {
        let response = self.run(request, limits, false).await?;
        if response.status == JobStatus::Completed {
            Ok(response.content)
        } else {
            bail!("reconciliation ended with status {}", response.status)
        }
    }
}
