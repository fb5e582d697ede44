use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::pipeline::StepStatus;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "No pipeline configured for asset_type={asset_type} intensity={intensity}"
    )]
    ConfigurationMismatch {
        asset_type: String,
        intensity: String,
    },

    #[error("Invalid pipeline step index {index} (pipeline has {len} steps)")]
    InvalidStepIndex { index: usize, len: usize },

    #[error("Invalid step transition {from} -> {to}")]
    InvalidTransition { from: StepStatus, to: StepStatus },

    #[error("Store unavailable: {0}")]
    TransientStore(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True for failures caused by an unreachable or slow dependency.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::TransientStore(_) => true,
            OrchestratorError::RetriesExhausted { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Bound an external-store call so a stalled dependency surfaces as
/// [`OrchestratorError::TransientStore`] instead of blocking the caller.
pub async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::TransientStore(format!(
            "{operation} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
