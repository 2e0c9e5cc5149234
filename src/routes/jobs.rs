//! Polling, result retrieval and cancellation of ranking jobs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::jobs::{Job, JobStatus};
use crate::ranking::Report;
use crate::state::AppState;

#[instrument(name = "jobs::progress", skip(state))]
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    state
        .jobs
        .get(&job_id)
        .map(Json)
        .ok_or(AppError::JobNotFound(job_id))
}

#[instrument(name = "jobs::result", skip(state))]
pub async fn result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| AppError::JobNotFound(job_id.clone()))?;

    match job.status {
        JobStatus::Processing => Err(AppError::JobNotFinished),
        JobStatus::Error => Err(AppError::JobFailed(
            job.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        JobStatus::Completed => job
            .result
            .map(|report| Json(Report::clone(&report)))
            .ok_or_else(|| AppError::Internal(format!("completed job {} has no result", job_id))),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAccepted {
    pub job_id: String,
    pub message: String,
}

#[instrument(name = "jobs::cancel", skip(state))]
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<CancelAccepted>), AppError> {
    state.jobs.cancel(&job_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelAccepted {
            job_id,
            message: "Cancellation requested".to_string(),
        }),
    ))
}
