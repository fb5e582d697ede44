//! TTL-bounded pipeline persistence.
//!
//! The store keeps the full [`Pipeline`] for a job under
//! `<namespace>:pipeline:<job_id>`. Writes always replace the whole value and
//! refresh the TTL. Reads surface every failure as
//! [`OrchestratorError::NotFound`]; best-effort writes swallow cache outages
//! so a flaky cache never fails a running job.

mod memory;
#[cfg(feature = "database")]
mod redis_cache;

pub use memory::InMemoryPipelineCache;
#[cfg(feature = "database")]
pub use redis_cache::RedisPipelineCache;

use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result, bounded};
use crate::pipeline::{Pipeline, StepOutcome, StepStatus};

/// Retention window for stored pipelines.
pub const PIPELINE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// String key/value cache with expiring writes.
#[async_trait]
pub trait PipelineCache: Send + Sync {
    /// Establish the connection if the implementation connects lazily.
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct PipelineStoreSettings {
    pub namespace: String,
    pub ttl: Duration,
    /// Upper bound for a single cache call.
    pub op_timeout: Duration,
    /// Linear backoff unit; attempt `n` waits `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for PipelineStoreSettings {
    fn default() -> Self {
        Self {
            namespace: "asm".to_string(),
            ttl: PIPELINE_TTL,
            op_timeout: Duration::from_secs(3),
            backoff_step: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct PipelineStore {
    cache: Arc<dyn PipelineCache>,
    settings: PipelineStoreSettings,
}

impl fmt::Debug for PipelineStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStore")
            .field("cache", &"PipelineCache")
            .field("settings", &self.settings)
            .finish()
    }
}

impl PipelineStore {
    pub fn new(cache: Arc<dyn PipelineCache>, settings: PipelineStoreSettings) -> Self {
        Self { cache, settings }
    }

    pub fn settings(&self) -> &PipelineStoreSettings {
        &self.settings
    }

    pub fn key(&self, job_id: &str) -> String {
        format!("{}:pipeline:{}", self.settings.namespace, job_id)
    }

    pub async fn ensure_ready(&self) -> Result<()> {
        bounded(
            self.settings.op_timeout,
            "cache connect",
            self.cache.ensure_ready(),
        )
        .await
    }

    /// Load the pipeline for `job_id`. Absent, unreachable and undecodable
    /// values all report `NotFound`.
    pub async fn get(&self, job_id: &str) -> Result<Pipeline> {
        let key = self.key(job_id);
        let raw = bounded(self.settings.op_timeout, "cache get", self.cache.get(&key))
            .await
            .map_err(|err| {
                warn!(target: "orchestrator::store", job_id, error = %err, "pipeline read failed");
                OrchestratorError::NotFound(format!("pipeline {job_id}: {err}"))
            })?
            .ok_or_else(|| {
                debug!(target: "orchestrator::store", job_id, %key, "pipeline key absent");
                OrchestratorError::NotFound(format!("pipeline {job_id}"))
            })?;

        serde_json::from_str(&raw).map_err(|err| {
            warn!(target: "orchestrator::store", job_id, error = %err, "stored pipeline is undecodable");
            OrchestratorError::NotFound(format!("pipeline {job_id}: undecodable value: {err}"))
        })
    }

    /// Strict write: every failure, including cache outages, is returned.
    pub async fn try_save(&self, job_id: &str, pipeline: &Pipeline) -> Result<()> {
        let json = serde_json::to_string(pipeline)?;
        let key = self.key(job_id);
        bounded(
            self.settings.op_timeout,
            "cache set",
            self.cache.set_with_ttl(&key, json, self.settings.ttl),
        )
        .await?;
        debug!(target: "orchestrator::store", job_id, %key, "pipeline stored");
        Ok(())
    }

    /// Best-effort write. Cache failures are logged and reported as success;
    /// only encoding failures are returned.
    pub async fn save(&self, job_id: &str, pipeline: &Pipeline) -> Result<()> {
        match self.try_save(job_id, pipeline).await {
            Ok(()) => Ok(()),
            Err(OrchestratorError::Serialization(err)) => {
                Err(OrchestratorError::Serialization(err))
            }
            Err(err) => {
                warn!(
                    target: "orchestrator::store",
                    job_id,
                    error = %err,
                    "continuing without pipeline cache write"
                );
                Ok(())
            }
        }
    }

    pub async fn update_step_status(
        &self,
        job_id: &str,
        step_index: usize,
        status: StepStatus,
    ) -> Result<()> {
        self.record_step_outcome(job_id, step_index, StepOutcome::status(status))
            .await
    }

    /// Load, mutate one step, re-save. Index and transition are validated
    /// before anything is written. Not atomic against a concurrent writer of
    /// the same job.
    pub async fn record_step_outcome(
        &self,
        job_id: &str,
        step_index: usize,
        outcome: StepOutcome,
    ) -> Result<()> {
        let mut pipeline = self.get(job_id).await?;
        let status = outcome.status;
        pipeline.step_mut(step_index)?.apply(outcome)?;
        self.save(job_id, &pipeline).await?;
        debug!(
            target: "orchestrator::store",
            job_id,
            step = step_index,
            status = %status,
            "step status updated"
        );
        Ok(())
    }

    pub async fn retryable_get(&self, job_id: &str, max_retries: u32) -> Result<Pipeline> {
        self.with_retries(job_id, "get", max_retries, || self.get(job_id))
            .await
    }

    pub async fn retryable_save(
        &self,
        job_id: &str,
        pipeline: &Pipeline,
        max_retries: u32,
    ) -> Result<()> {
        self.with_retries(job_id, "save", max_retries, || {
            self.try_save(job_id, pipeline)
        })
        .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        job_id: &str,
        operation: &str,
        max_retries: u32,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = max_retries.max(1);
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            target: "orchestrator::store",
                            job_id,
                            operation,
                            attempt,
                            "pipeline {operation} recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_retries => {
                    return Err(OrchestratorError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let wait = self.settings.backoff_step * attempt;
                    warn!(
                        target: "orchestrator::store",
                        job_id,
                        operation,
                        attempt,
                        max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "pipeline {operation} failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
