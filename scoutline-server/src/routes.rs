use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers::jobs, infra::app_state::AppState};

/// Job control-plane routes under `/asm`.
pub fn create_asm_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/start", post(jobs::start_job))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/pipeline", get(jobs::get_pipeline))
}
