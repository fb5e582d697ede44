use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use scoutline_core::{Job, JobKind, Pipeline};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    errors::{AppError, AppResult},
    infra::app_state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    pub user_id: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub status: &'static str,
    pub job_id: String,
    pub state: String,
    #[serde(rename = "type")]
    pub job_type: String,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = Utc::now() - *state.started_at;
    Json(json!({
        "status": "ok",
        "uptime_seconds": uptime.num_seconds(),
        "active_executions": state.registry.active_executions().await,
    }))
}

/// Register a discovery job directly, bypassing the queue.
pub async fn start_job(
    State(state): State<AppState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection, "invalid start payload");
        AppError::bad_request(format!("invalid request payload: {}", rejection.body_text()))
    })?;

    if request.id.trim().is_empty() || request.user_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "invalid request payload: id and user_id are required",
        ));
    }

    let kind: JobKind = request.job_type.parse().map_err(|_| {
        warn!(job_id = %request.id, received_type = %request.job_type, "unsupported job type");
        AppError::bad_request("unsupported job type")
    })?;

    let job = state
        .registry
        .start_job(&request.id, kind, Some(request.user_id.clone()))
        .await
        .map_err(|err| {
            warn!(job_id = %request.id, error = %err, "job registration failed");
            AppError::conflict(err.to_string())
        })?;

    info!(job_id = %job.id, user_id = %request.user_id, state = %job.state, "job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            status: "accepted",
            job_id: job.id,
            state: job.state.to_string(),
            job_type: job.kind.to_string(),
        }),
    ))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.registry.list_jobs().await)
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Job>> {
    let job = state.registry.get_job(&job_id).await?;
    Ok(Json(job))
}

/// Current pipeline as persisted in the cache.
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Pipeline>> {
    let pipeline = state.registry.store().get(&job_id).await?;
    Ok(Json(pipeline))
}
