use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::jobs::JobError;
use crate::ranking::DateRangeError;
use crate::source::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Discord bot is not connected")]
    NotConnected,

    #[error("Server not found: {0}")]
    GuildNotFound(String),

    #[error(transparent)]
    InvalidDateRange(#[from] DateRangeError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job has not completed yet")]
    JobNotFinished,

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Chat platform error: {0}")]
    Source(#[from] SourceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GuildNotFound(_) | AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidDateRange(_) | AppError::JobNotFinished | AppError::JobFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Job(JobError::AlreadyFinished(_)) => StatusCode::BAD_REQUEST,
            AppError::Job(JobError::GuildBusy { .. } | JobError::AlreadyExists(_)) => {
                StatusCode::CONFLICT
            }
            AppError::Job(JobError::AtCapacity { .. }) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Job(JobError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Source(SourceError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Source(SourceError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Source(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {:?}", self);
            "Internal server error".to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!(status = status.as_u16(), "{}", self);
            }
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
