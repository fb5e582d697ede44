use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::{OrchestratorError, Result};

/// Lifecycle state of a tracked job. The same labels are written to the
/// system of record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "DONE" | "COMPLETED" => Ok(JobState::Done),
            "FAILED" => Ok(JobState::Failed),
            other => Err(OrchestratorError::Validation(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

/// Kinds of jobs the orchestrator knows how to expand into pipelines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Attack-surface discovery.
    Asm,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Asm => "asm",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asm" => Ok(JobKind::Asm),
            other => Err(OrchestratorError::Validation(format!(
                "unsupported job type: {other}"
            ))),
        }
    }
}

/// A job tracked by the in-memory registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub user_id: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            user_id: None,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub(crate) fn transition(&mut self, state: JobState) -> JobState {
        let previous = self.state;
        self.state = state;
        self.updated_at = Utc::now();
        previous
    }
}
