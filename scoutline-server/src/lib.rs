//! # Scoutline Server
//!
//! Process wiring for the orchestrator: the AMQP consumer feeding the job
//! registry, and a small HTTP control plane for submitting and inspecting
//! jobs.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use infra::app_state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::jobs::health))
        .nest("/asm", routes::create_asm_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
