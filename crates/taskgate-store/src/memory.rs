use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use taskgate_common::{Job, JobStatus};

use crate::types::{JobStore, KeyValueStore};

/// In-process key-value store with per-key expiry and advisory locks.
/// Used in tests and single-node deployments where no Redis is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<RwLock<KvInner>>,
}

#[derive(Debug, Default)]
struct KvInner {
    kv: BTreeMap<String, KvEntry>,
    locks: HashMap<String, Instant>,
}

#[derive(Debug)]
struct KvEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .kv
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        inner.kv.retain(|_, entry| entry.expires_at > now);
        inner.kv.insert(
            key.to_string(),
            KvEntry {
                value,
                expires_at: now + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.kv.remove(key);
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<u64>> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        Ok(inner
            .kv
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| (entry.expires_at - now).as_secs()))
    }

    async fn try_lock(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        if let Some(expires_at) = inner.locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        inner
            .locks
            .insert(key.to_string(), now + Duration::from_secs(ttl_secs));
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.locks.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let keys: Vec<String> = inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            inner.kv.remove(&key);
        }
        Ok(removed)
    }
}

/// In-process job store keyed by job id.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = status;
        }
        Ok(())
    }

    async fn update_token_counts(
        &self,
        job_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
        chunk_count: u32,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.input_tokens = input_tokens;
            job.output_tokens = output_tokens;
            job.duration_ms = Some(duration_ms);
            job.chunk_count = chunk_count;
        }
        Ok(())
    }

    async fn fetch(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(job_id).cloned())
    }
}
