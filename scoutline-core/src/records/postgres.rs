use async_trait::async_trait;
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions, types::Json};
use std::time::Duration;
use tracing::{debug, info};

use super::{DiscoveryRecord, JobRecordStore};
use crate::error::{OrchestratorError, Result};
use crate::job::JobState;

/// Typed projection of an `asm_discoveries` row. Enum and UUID columns are
/// cast to text so the row decodes independently of the database's type
/// names.
#[derive(Debug, Clone, FromRow)]
pub struct DiscoveryRow {
    pub id: String,
    pub user_id: Option<String>,
    pub asset_type: Option<String>,
    pub intensity: Option<String>,
    pub status: Option<String>,
    pub manual_targets: Option<Json<Vec<String>>>,
}

impl From<DiscoveryRow> for DiscoveryRecord {
    fn from(row: DiscoveryRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            asset_type: row.asset_type,
            intensity: row.intensity,
            status: row.status,
            targets: row
                .manual_targets
                .map(|Json(targets)| targets)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresJobRecords {
    pool: PgPool,
}

impl PostgresJobRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that opens connections on first use.
    pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestratorError::Internal(format!("Invalid PostgreSQL configuration: {e}"))
            })?;
        Ok(Self::new(pool))
    }

    // Enum columns do not accept a text bind, so each label is a literal.
    fn status_update_sql(state: JobState) -> &'static str {
        match state {
            JobState::Pending => {
                "UPDATE asm_discoveries SET status = 'PENDING', updated_at = NOW() WHERE id::text = $1"
            }
            JobState::Running => {
                "UPDATE asm_discoveries SET status = 'RUNNING', updated_at = NOW() WHERE id::text = $1"
            }
            JobState::Done => {
                "UPDATE asm_discoveries SET status = 'DONE', updated_at = NOW() WHERE id::text = $1"
            }
            JobState::Failed => {
                "UPDATE asm_discoveries SET status = 'FAILED', updated_at = NOW() WHERE id::text = $1"
            }
        }
    }
}

#[async_trait]
impl JobRecordStore for PostgresJobRecords {
    async fn ensure_ready(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::TransientStore(format!("PostgreSQL is unreachable: {e}"))
            })?;
        info!(target: "orchestrator::registry", "PostgreSQL system of record ready");
        Ok(())
    }

    async fn fetch_discovery(&self, job_id: &str) -> Result<DiscoveryRecord> {
        let row = sqlx::query_as::<_, DiscoveryRow>(
            r#"
            SELECT
                id::text AS id,
                user_id::text AS user_id,
                asset_type::text AS asset_type,
                intensity::text AS intensity,
                status::text AS status,
                to_jsonb(manual_targets) AS manual_targets
            FROM asm_discoveries
            WHERE id::text = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Internal(format!("Failed to fetch discovery {job_id}: {e}"))
        })?
        .ok_or_else(|| OrchestratorError::NotFound(format!("discovery {job_id}")))?;

        debug!(
            target: "orchestrator::registry",
            job_id,
            asset_type = ?row.asset_type,
            intensity = ?row.intensity,
            "discovery row fetched"
        );
        Ok(row.into())
    }

    async fn update_status(&self, job_id: &str, state: JobState) -> Result<()> {
        let result = sqlx::query(Self::status_update_sql(state))
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Internal(format!(
                    "Failed to set discovery {job_id} status to {state}: {e}"
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("discovery {job_id}")));
        }
        Ok(())
    }

    async fn list_ids_with_status(&self, state: JobState) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT id::text FROM asm_discoveries WHERE status::text = $1 ORDER BY updated_at",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Internal(format!("Failed to list {state} discoveries: {e}"))
        })
    }
}
