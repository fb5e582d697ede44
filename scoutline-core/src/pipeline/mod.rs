//! Pipeline model and generation.
//!
//! A pipeline is the ordered list of tool executions generated for a single
//! job. Order is fixed when the pipeline is generated; afterwards only step
//! status and result fields change.

pub mod generator;

pub use generator::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Canonical status for a pipeline step.
///
/// `COMPLETED` is accepted on decode and mapped to [`StepStatus::Done`]; it is
/// never written.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
pub enum StepStatus {
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE", alias = "COMPLETED")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Done => "DONE",
            StepStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Done | StepStatus::Failed => 2,
        }
    }

    /// Forward-only: a terminal step never changes again, a running step
    /// never returns to pending. Re-writing the current status is allowed so
    /// replays stay idempotent.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tool invocation within a pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub order: u32,
    pub tool: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    pub fn pending(order: u32, tool: impl Into<String>) -> Self {
        Self {
            order,
            tool: tool.into(),
            status: StepStatus::Pending,
            duration_ms: None,
            summary: None,
            result: None,
            data_ref: None,
            error: None,
        }
    }

    /// Apply an outcome, keeping previously recorded fields the outcome does
    /// not carry.
    pub fn apply(&mut self, outcome: StepOutcome) -> Result<()> {
        if !self.status.can_transition_to(outcome.status) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status,
                to: outcome.status,
            });
        }

        self.status = outcome.status;
        if let Some(duration_ms) = outcome.duration_ms {
            self.duration_ms = Some(duration_ms);
        }
        if let Some(summary) = outcome.summary {
            self.summary = Some(summary);
        }
        if let Some(result) = outcome.result {
            self.result = Some(result);
        }
        if let Some(data_ref) = outcome.data_ref {
            self.data_ref = Some(data_ref);
        }
        if let Some(error) = outcome.error {
            self.error = Some(error);
        }
        Ok(())
    }
}

/// Everything a single step write may record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub duration_ms: Option<i64>,
    pub summary: Option<serde_json::Map<String, serde_json::Value>>,
    pub result: Option<Vec<serde_json::Value>>,
    pub data_ref: Option<String>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn status(status: StepStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn done(duration_ms: i64, result: Vec<serde_json::Value>) -> Self {
        let mut summary = serde_json::Map::new();
        summary.insert("items".to_string(), serde_json::Value::from(result.len()));
        Self {
            status: StepStatus::Done,
            duration_ms: Some(duration_ms),
            summary: Some(summary),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(duration_ms: Option<i64>, error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Full pipeline state for one job, as persisted in the pipeline store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub job_id: String,
    pub asset_type: String,
    pub intensity: String,
    /// Overall status. Copied from the system-of-record row when generated
    /// and set to `DONE` once every step succeeded.
    pub status: String,
    #[serde(rename = "pipeline")]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl Pipeline {
    pub fn step(&self, index: usize) -> Result<&Step> {
        let len = self.steps.len();
        self.steps
            .get(index)
            .ok_or(OrchestratorError::InvalidStepIndex { index, len })
    }

    pub fn step_mut(&mut self, index: usize) -> Result<&mut Step> {
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or(OrchestratorError::InvalidStepIndex { index, len })
    }

    /// First step that has not started yet.
    pub fn next_pending(&self) -> Option<(usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.status == StepStatus::Pending)
    }

    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(|step| step.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pipeline {
        Pipeline {
            job_id: "J1".to_string(),
            asset_type: "domain".to_string(),
            intensity: "LIGHT".to_string(),
            status: "PENDING".to_string(),
            steps: vec![Step::pending(1, "subfinder"), Step::pending(2, "basic_dns")],
            targets: vec![],
        }
    }

    #[test]
    fn forward_only_transitions() {
        use StepStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn encoded_field_names_match_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["job_id"], "J1");
        assert_eq!(json["pipeline"][0]["order"], 1);
        assert_eq!(json["pipeline"][0]["tool"], "subfinder");
        assert_eq!(json["pipeline"][0]["status"], "PENDING");
        assert!(json["pipeline"][0].get("duration_ms").is_none());
        assert!(json.get("targets").is_none());
    }

    #[test]
    fn legacy_completed_label_decodes_as_done() {
        let raw = r#"{"job_id":"J9","asset_type":"ip","intensity":"LIGHT","status":"ACTIVE",
            "pipeline":[{"order":1,"tool":"ip_resolve","status":"COMPLETED"}]}"#;
        let pipeline: Pipeline = serde_json::from_str(raw).unwrap();
        assert_eq!(pipeline.steps[0].status, StepStatus::Done);
        assert!(pipeline.is_finished());
    }

    #[test]
    fn apply_keeps_fields_not_carried_by_outcome() {
        let mut pipeline = sample();
        let step = pipeline.step_mut(0).unwrap();
        step.apply(StepOutcome::status(StepStatus::Running)).unwrap();
        step.apply(StepOutcome::done(42, vec![serde_json::json!("a.example.com")]))
            .unwrap();

        let err = step
            .apply(StepOutcome::failed(None, "late failure"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let step = pipeline.step(0).unwrap();
        assert_eq!(step.status, StepStatus::Done);
        assert_eq!(step.duration_ms, Some(42));
        assert_eq!(step.summary.as_ref().unwrap()["items"], 1);
        assert!(step.error.is_none());
        assert_eq!(pipeline.next_pending().map(|(i, _)| i), Some(1));
    }

    #[test]
    fn step_lookup_reports_bounds() {
        let pipeline = sample();
        let err = pipeline.step(2).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStepIndex { index: 2, len: 2 }
        ));
    }
}
