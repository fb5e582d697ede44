//! System of record for discovery jobs.
//!
//! The relational store owns the authoritative asset attributes of a job and
//! its final status. The registry reads one typed [`DiscoveryRecord`] per job
//! and writes lifecycle labels back.

#[cfg(feature = "database")]
mod postgres;

#[cfg(feature = "database")]
pub use postgres::{DiscoveryRow, PostgresJobRecords};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};
use crate::job::JobState;

/// Attributes of one discovery row needed to build a pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub asset_type: Option<String>,
    pub intensity: Option<String>,
    /// Row status, in the system-of-record vocabulary.
    pub status: Option<String>,
    pub targets: Vec<String>,
}

impl DiscoveryRecord {
    pub fn new(id: impl Into<String>, asset_type: &str, intensity: &str) -> Self {
        Self {
            id: id.into(),
            asset_type: Some(asset_type.to_string()),
            intensity: Some(intensity.to_string()),
            status: Some("PENDING".to_string()),
            ..Self::default()
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Verify connectivity; called once before the first registration.
    async fn ensure_ready(&self) -> Result<()>;

    /// Missing rows report [`OrchestratorError::NotFound`].
    async fn fetch_discovery(&self, job_id: &str) -> Result<DiscoveryRecord>;

    async fn update_status(&self, job_id: &str, state: JobState) -> Result<()>;

    /// IDs of every row currently carrying `state`.
    async fn list_ids_with_status(&self, state: JobState) -> Result<Vec<String>>;
}

/// Map-backed system of record for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryJobRecords {
    rows: RwLock<HashMap<String, DiscoveryRecord>>,
}

impl InMemoryJobRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: DiscoveryRecord) {
        self.rows.write().await.insert(record.id.clone(), record);
    }

    pub async fn status_of(&self, job_id: &str) -> Option<String> {
        self.rows
            .read()
            .await
            .get(job_id)
            .and_then(|row| row.status.clone())
    }
}

#[async_trait]
impl JobRecordStore for InMemoryJobRecords {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_discovery(&self, job_id: &str) -> Result<DiscoveryRecord> {
        self.rows
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("discovery {job_id}")))
    }

    async fn update_status(&self, job_id: &str, state: JobState) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(job_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("discovery {job_id}")))?;
        row.status = Some(state.as_str().to_string());
        Ok(())
    }

    async fn list_ids_with_status(&self, state: JobState) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.status.as_deref() == Some(state.as_str()))
            .map(|row| row.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
