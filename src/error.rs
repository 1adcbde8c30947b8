use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No trained model available")]
    ModelUnavailable,

    #[error("Document store error: {0}")]
    Upstream(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            PipelineError::InvalidInput(msg) | PipelineError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            PipelineError::ModelUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            PipelineError::Upstream(_) | PipelineError::HttpClient(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            PipelineError::Training(_)
            | PipelineError::Persistence(_)
            | PipelineError::Database(_)
            | PipelineError::Cache(_)
            | PipelineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
