use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use scoutline_core::OrchestratorError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(_) => Self::not_found(err.to_string()),
            OrchestratorError::Validation(_) => Self::bad_request(err.to_string()),
            OrchestratorError::DuplicateJob(_) => Self::conflict(err.to_string()),
            ref e if e.is_transient() => Self::unavailable(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_errors_map_to_http_statuses() {
        let cases = [
            (OrchestratorError::NotFound("job J1".into()), StatusCode::NOT_FOUND),
            (OrchestratorError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (OrchestratorError::DuplicateJob("J1".into()), StatusCode::CONFLICT),
            (
                OrchestratorError::TransientStore("cache down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::UnknownTool("nmap".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let message = err.to_string();
            let app = AppError::from(err);
            assert_eq!(app.status, status);
            assert_eq!(app.message, message);
        }
    }
}
