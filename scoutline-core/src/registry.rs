//! In-memory job registry and execution supervision.
//!
//! The registry owns the table of tracked jobs behind a single `RwLock` and
//! never performs I/O while holding it. Each accepted job gets one supervised
//! execution task; the task writes the terminal status to the system of
//! record once the registration that spawned it has settled.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Mutex, OnceCell, RwLock, oneshot, watch};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, Result, bounded};
use crate::executor::{ExecutionResult, Executor};
use crate::job::{Job, JobKind, JobState};
use crate::pipeline::{PipelineGenerator, PipelineRequest};
use crate::records::JobRecordStore;
use crate::store::PipelineStore;

#[derive(Clone, Debug)]
pub struct RegistrySettings {
    /// Upper bound for a single system-of-record call.
    pub record_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            record_timeout: Duration::from_secs(5),
        }
    }
}

struct TrackedExecution {
    generation: u64,
    outcome: watch::Receiver<Option<ExecutionResult>>,
}

struct RegistryInner {
    jobs: RwLock<HashMap<String, Job>>,
    executions: Mutex<HashMap<String, TrackedExecution>>,
    records: Arc<dyn JobRecordStore>,
    store: PipelineStore,
    generator: PipelineGenerator,
    executor: Executor,
    settings: RegistrySettings,
    ready: OnceCell<()>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

/// Shared handle to the job registry. Cloning is cheap; all clones see the
/// same jobs.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self
            .inner
            .jobs
            .try_read()
            .map(|jobs| jobs.len())
            .unwrap_or_default();
        f.debug_struct("JobRegistry")
            .field("tracked_jobs", &tracked)
            .field("running_tasks", &self.inner.tasks.len())
            .field("settings", &self.inner.settings)
            .field("shutdown_cancelled", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl JobRegistry {
    pub fn new(
        records: Arc<dyn JobRecordStore>,
        store: PipelineStore,
        generator: PipelineGenerator,
        executor: Executor,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: RwLock::new(HashMap::new()),
                executions: Mutex::new(HashMap::new()),
                records,
                store,
                generator,
                executor,
                settings,
                ready: OnceCell::new(),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &PipelineStore {
        &self.inner.store
    }

    /// Build a job from its parts and register it.
    pub async fn start_job(
        &self,
        job_id: &str,
        kind: JobKind,
        user_id: Option<String>,
    ) -> Result<Job> {
        let mut job = Job::new(job_id, kind);
        job.user_id = user_id;
        self.register_job(job).await
    }

    /// Accept a job: fetch its discovery attributes, generate and persist its
    /// pipeline, launch the executor and mark it RUNNING. Any failure before
    /// the executor starts leaves the registry as it was.
    pub async fn register_job(&self, job: Job) -> Result<Job> {
        if job.id.trim().is_empty() {
            return Err(OrchestratorError::Validation("job id is required".to_string()));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::Internal(
                "registry is shutting down".to_string(),
            ));
        }

        self.ensure_ready().await?;

        let job_id = job.id.clone();
        {
            let mut jobs = self.inner.jobs.write().await;
            if jobs.contains_key(&job_id) {
                return Err(OrchestratorError::DuplicateJob(job_id));
            }
            // A removed job may still be executing; its run owns the ID until it ends.
            if self
                .inner
                .executions
                .lock()
                .await
                .get(&job_id)
                .is_some_and(|tracked| tracked.outcome.borrow().is_none())
            {
                return Err(OrchestratorError::DuplicateJob(job_id));
            }
            let mut job = job;
            job.transition(JobState::Pending);
            jobs.insert(job_id.clone(), job);
        }
        debug!(target: "orchestrator::registry", job_id, "job inserted as PENDING");

        let record = match self.record_call(self.inner.records.fetch_discovery(&job_id)).await {
            Ok(record) => record,
            Err(err) => {
                error!(target: "orchestrator::registry", job_id, error = %err, "failed to fetch job data");
                self.rollback(&job_id).await;
                return Err(err);
            }
        };

        let (asset_type, intensity) = match (
            record.asset_type.as_deref().filter(|v| !v.is_empty()),
            record.intensity.as_deref().filter(|v| !v.is_empty()),
        ) {
            (Some(asset_type), Some(intensity)) => (asset_type.to_string(), intensity.to_string()),
            (None, _) => {
                self.rollback(&job_id).await;
                return Err(OrchestratorError::Validation(
                    "invalid or missing asset_type".to_string(),
                ));
            }
            (_, None) => {
                self.rollback(&job_id).await;
                return Err(OrchestratorError::Validation(
                    "invalid or missing intensity".to_string(),
                ));
            }
        };

        let request = PipelineRequest {
            job_id: job_id.clone(),
            asset_type,
            intensity,
            initial_status: record.status.clone().unwrap_or_default(),
            targets: record.targets.clone(),
        };
        let pipeline = match self.inner.generator.generate(&request) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                error!(target: "orchestrator::registry", job_id, error = %err, "failed to generate pipeline");
                self.rollback(&job_id).await;
                return Err(err);
            }
        };

        if let Err(err) = self.inner.store.save(&job_id, &pipeline).await {
            error!(target: "orchestrator::registry", job_id, error = %err, "failed to encode pipeline");
            self.rollback(&job_id).await;
            return Err(err);
        }

        let (registered_tx, cancel) = self.spawn_execution(&job_id).await;

        if let Err(err) = self
            .record_call(self.inner.records.update_status(&job_id, JobState::Running))
            .await
        {
            error!(target: "orchestrator::registry", job_id, error = %err, "failed to mark job RUNNING");
            cancel.cancel();
            let _ = registered_tx.send(false);
            self.rollback(&job_id).await;
            return Err(err);
        }

        let registered = {
            let mut jobs = self.inner.jobs.write().await;
            jobs.get_mut(&job_id).map(|job| {
                job.transition(JobState::Running);
                job.clone()
            })
        };
        let _ = registered_tx.send(true);

        info!(
            target: "orchestrator::registry",
            job_id,
            asset_type = %pipeline.asset_type,
            intensity = %pipeline.intensity,
            tools = pipeline.steps.len(),
            "job registered"
        );

        registered.ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
    }

    pub async fn update_job_state(&self, job_id: &str, state: JobState) -> Result<()> {
        let mut jobs = self.inner.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))?;
        let previous = job.transition(state);
        debug!(target: "orchestrator::registry", job_id, from = %previous, to = %state, "job state updated");
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.inner
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
    }

    /// Tracked jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Stop tracking a job. A running execution is not interrupted; it still
    /// writes its terminal status to the system of record.
    pub async fn remove_job(&self, job_id: &str) -> Result<Job> {
        let removed = self
            .inner
            .jobs
            .write()
            .await
            .remove(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))?;

        let mut executions = self.inner.executions.lock().await;
        if executions
            .get(job_id)
            .is_some_and(|tracked| tracked.outcome.borrow().is_some())
        {
            executions.remove(job_id);
        }
        Ok(removed)
    }

    /// Wait for the job's current execution to finish and its terminal
    /// status to be written.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<ExecutionResult> {
        let mut outcome = self
            .inner
            .executions
            .lock()
            .await
            .get(job_id)
            .map(|tracked| tracked.outcome.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("execution {job_id}")))?;

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                OrchestratorError::Internal(format!("execution {job_id} ended without a result"))
            })?;
        (*finished)
            .clone()
            .ok_or_else(|| OrchestratorError::Internal(format!("execution {job_id} has no result")))
    }

    /// Number of executions that have not finished yet.
    pub async fn active_executions(&self) -> usize {
        self.inner
            .executions
            .lock()
            .await
            .values()
            .filter(|tracked| tracked.outcome.borrow().is_none())
            .count()
    }

    /// Mark RUNNING rows this process is not executing as FAILED. Returns
    /// the IDs that were reconciled.
    pub async fn recover_orphaned_jobs(&self) -> Result<Vec<String>> {
        self.ensure_ready().await?;

        let running = self
            .record_call(self.inner.records.list_ids_with_status(JobState::Running))
            .await?;
        let orphaned: Vec<String> = {
            let executions = self.inner.executions.lock().await;
            running
                .into_iter()
                .filter(|id| {
                    executions
                        .get(id)
                        .is_none_or(|tracked| tracked.outcome.borrow().is_some())
                })
                .collect()
        };

        let mut recovered = Vec::with_capacity(orphaned.len());
        for job_id in orphaned {
            match self
                .record_call(self.inner.records.update_status(&job_id, JobState::Failed))
                .await
            {
                Ok(()) => {
                    warn!(target: "orchestrator::registry", job_id, "orphaned RUNNING job marked FAILED");
                    recovered.push(job_id);
                }
                Err(err) => {
                    error!(target: "orchestrator::registry", job_id, error = %err, "failed to reconcile orphaned job");
                }
            }
        }

        info!(target: "orchestrator::registry", recovered = recovered.len(), "orphan recovery finished");
        Ok(recovered)
    }

    /// Cancel every execution and wait for the supervised tasks to finish.
    pub async fn shutdown(&self) {
        info!(target: "orchestrator::registry", active = self.inner.tasks.len(), "shutting down job registry");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!(target: "orchestrator::registry", "job registry stopped");
    }

    async fn ensure_ready(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .ready
            .get_or_try_init(|| async {
                bounded(
                    inner.settings.record_timeout,
                    "system of record connect",
                    inner.records.ensure_ready(),
                )
                .await?;
                if let Err(err) = inner.store.ensure_ready().await {
                    warn!(target: "orchestrator::registry", error = %err, "pipeline cache unavailable, continuing without it");
                }
                Ok::<(), OrchestratorError>(())
            })
            .await
            .map(|_| ())
    }

    async fn record_call<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        bounded(self.inner.settings.record_timeout, "system of record call", fut).await
    }

    async fn rollback(&self, job_id: &str) {
        self.inner.jobs.write().await.remove(job_id);
        debug!(target: "orchestrator::registry", job_id, "registration rolled back");
    }

    async fn spawn_execution(&self, job_id: &str) -> (oneshot::Sender<bool>, CancellationToken) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let (registered_tx, registered_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        self.inner.executions.lock().await.insert(
            job_id.to_string(),
            TrackedExecution {
                generation,
                outcome: outcome_rx,
            },
        );

        let registry = self.clone();
        let task_job_id = job_id.to_string();
        let task_cancel = cancel.clone();
        self.inner.tasks.spawn(async move {
            registry
                .supervise(task_job_id, generation, task_cancel, registered_rx, outcome_tx)
                .await;
        });

        (registered_tx, cancel)
    }

    async fn supervise(
        self,
        job_id: String,
        generation: u64,
        cancel: CancellationToken,
        registered: oneshot::Receiver<bool>,
        outcome: watch::Sender<Option<ExecutionResult>>,
    ) {
        let result = self.inner.executor.run(&job_id, cancel).await;
        let registered = registered.await.unwrap_or(false);

        if !registered {
            debug!(target: "orchestrator::registry", job_id, "registration did not complete, skipping terminal status");
            self.release_execution(&job_id, generation).await;
            let _ = outcome.send(Some(result));
            return;
        }

        let state = if result.success {
            JobState::Done
        } else {
            JobState::Failed
        };

        match self
            .record_call(self.inner.records.update_status(&job_id, state))
            .await
        {
            Ok(()) => info!(target: "orchestrator::registry", job_id, state = %state, "terminal job status recorded"),
            Err(err) => error!(
                target: "orchestrator::registry",
                job_id,
                state = %state,
                error = %err,
                "failed to record terminal job status"
            ),
        }

        if let Some(job) = self.inner.jobs.write().await.get_mut(&job_id) {
            job.transition(state);
        }

        if let Some(reason) = &result.error {
            error!(target: "orchestrator::registry", job_id, error = %reason, "job failed");
        } else {
            info!(target: "orchestrator::registry", job_id, "job completed");
        }
        let _ = outcome.send(Some(result));

        // Published before this check so a concurrent remove_job either sees
        // the outcome or is seen here.
        if !self.inner.jobs.read().await.contains_key(&job_id) {
            self.release_execution(&job_id, generation).await;
        }
    }

    /// Drop the execution entry if it still belongs to `generation`.
    async fn release_execution(&self, job_id: &str, generation: u64) {
        let mut executions = self.inner.executions.lock().await;
        if executions
            .get(job_id)
            .is_some_and(|tracked| tracked.generation == generation)
        {
            executions.remove(job_id);
        }
    }
}
