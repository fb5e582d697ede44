//! Sequential pipeline execution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::pipeline::{StepOutcome, StepStatus};
use crate::store::PipelineStore;
use crate::tools::{ToolInput, ToolRegistry};

#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    /// Attempts made to load the pipeline before giving up.
    pub load_attempts: u32,
    /// Upper bound for a single tool invocation.
    pub tool_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            load_attempts: 3,
            tool_timeout: Duration::from_secs(900),
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub job_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn succeeded(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: true,
            error: None,
            ended_at: Utc::now(),
        }
    }

    fn failed(job_id: &str, err: &OrchestratorError) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            error: Some(err.to_string()),
            ended_at: Utc::now(),
        }
    }
}

/// Runs one job's pipeline step by step, recording every transition in the
/// pipeline store. Step-status writes are best effort: a failed write is
/// logged and execution continues.
#[derive(Clone, Debug)]
pub struct Executor {
    store: PipelineStore,
    tools: Arc<ToolRegistry>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(store: PipelineStore, tools: Arc<ToolRegistry>, settings: ExecutorSettings) -> Self {
        Self {
            store,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn run(&self, job_id: &str, cancel: CancellationToken) -> ExecutionResult {
        info!(target: "orchestrator::executor", job_id, "execution started");
        match self.execute(job_id, &cancel).await {
            Ok(()) => {
                info!(target: "orchestrator::executor", job_id, "execution finished successfully");
                ExecutionResult::succeeded(job_id)
            }
            Err(err) => {
                error!(target: "orchestrator::executor", job_id, error = %err, "execution failed");
                ExecutionResult::failed(job_id, &err)
            }
        }
    }

    async fn execute(&self, job_id: &str, cancel: &CancellationToken) -> Result<()> {
        let pipeline = self
            .store
            .retryable_get(job_id, self.settings.load_attempts)
            .await?;
        let total = pipeline.steps.len();
        info!(
            target: "orchestrator::executor",
            job_id,
            asset_type = %pipeline.asset_type,
            intensity = %pipeline.intensity,
            steps = total,
            "pipeline loaded"
        );

        let mut input = ToolInput::for_pipeline(&pipeline);

        for (index, step) in pipeline.steps.iter().enumerate() {
            if step.status == StepStatus::Done {
                info!(target: "orchestrator::executor", job_id, step = step.order, tool = %step.tool, "step already done, skipping");
                continue;
            }
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled(format!(
                    "job {job_id} before step {}",
                    step.order
                )));
            }

            info!(
                target: "orchestrator::executor",
                job_id,
                step = step.order,
                of = total,
                tool = %step.tool,
                "running step"
            );
            self.record(job_id, index, StepOutcome::status(StepStatus::Running))
                .await;

            let Some(tool) = self.tools.get(&step.tool) else {
                let err = OrchestratorError::UnknownTool(step.tool.clone());
                self.record(job_id, index, StepOutcome::failed(None, err.to_string()))
                    .await;
                return Err(err);
            };

            let step_cancel = cancel.child_token();
            let _guard = step_cancel.clone().drop_guard();
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.settings.tool_timeout, tool.run(&step_cancel, &input))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(OrchestratorError::tool(
                        &step.tool,
                        format!(
                            "timed out after {}s",
                            self.settings.tool_timeout.as_secs()
                        ),
                    )),
                };
            let duration_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(results) => {
                    info!(
                        target: "orchestrator::executor",
                        job_id,
                        step = step.order,
                        tool = %step.tool,
                        duration_ms,
                        items = results.len(),
                        "step completed"
                    );
                    self.record(job_id, index, StepOutcome::done(duration_ms, results.clone()))
                        .await;
                    input.previous_results = results;
                }
                Err(err) => {
                    self.record(
                        job_id,
                        index,
                        StepOutcome::failed(Some(duration_ms), err.to_string()),
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        self.mark_pipeline_done(job_id).await;
        Ok(())
    }

    async fn record(&self, job_id: &str, index: usize, outcome: StepOutcome) {
        let status = outcome.status;
        if let Err(err) = self.store.record_step_outcome(job_id, index, outcome).await {
            warn!(
                target: "orchestrator::executor",
                job_id,
                step = index,
                status = %status,
                error = %err,
                "failed to record step status"
            );
        }
    }

    // Reload so the step results written during the run are kept.
    async fn mark_pipeline_done(&self, job_id: &str) {
        match self.store.get(job_id).await {
            Ok(mut latest) => {
                latest.status = "DONE".to_string();
                if let Err(err) = self.store.save(job_id, &latest).await {
                    warn!(target: "orchestrator::executor", job_id, error = %err, "failed to save final pipeline status");
                }
            }
            Err(err) => {
                warn!(target: "orchestrator::executor", job_id, error = %err, "failed to load pipeline for final status");
            }
        }
    }
}
