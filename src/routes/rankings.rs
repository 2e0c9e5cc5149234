//! Starting ranking jobs.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::AppError;
use crate::jobs::spawn_ranking_job;
use crate::middleware::RequestId;
use crate::ranking::{DateRange, RankingRequest};
use crate::state::AppState;

/// Query parameters. Everything arrives as a string so malformed values can
/// fall back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingParams {
    pub limit: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl RankingParams {
    /// Per-channel budget; missing, zero or unparseable values use `default`.
    pub fn limit_or(&self, default: usize) -> usize {
        non_empty(&self.limit)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default)
    }

    pub fn date_range(&self) -> Result<DateRange, AppError> {
        Ok(DateRange::from_calendar_dates(
            non_empty(&self.start_date),
            non_empty(&self.end_date),
        )?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    pub message: String,
    pub poll_interval_ms: u64,
}

/// Validates the request, registers a job and starts it in the background.
#[instrument(
    name = "rankings::start",
    skip(state, params, request_id),
    fields(request_id = %request_id.0)
)]
pub async fn start(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(guild_id): Path<String>,
    Query(params): Query<RankingParams>,
) -> Result<Json<JobAccepted>, AppError> {
    if !state.source.is_connected() {
        return Err(AppError::NotConnected);
    }

    let range = params.date_range()?;
    let limit = params.limit_or(state.config.ranking.default_limit);

    let guild = state
        .source
        .guild(&guild_id)
        .await?
        .ok_or_else(|| AppError::GuildNotFound(guild_id.clone()))?;

    let handle = state.jobs.open(&guild.id, &guild.name)?;
    let job_id = handle.id().to_string();
    tracing::info!(%job_id, server = %guild.name, limit, "Ranking job accepted");

    spawn_ranking_job(
        state.pipeline.clone(),
        handle,
        RankingRequest::new(guild.id, limit, range),
        guild.name,
    );

    Ok(Json(JobAccepted {
        job_id,
        message: "Ranking started".to_string(),
        poll_interval_ms: state.config.jobs.poll_interval_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<&str>) -> RankingParams {
        RankingParams {
            limit: limit.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_defaults() {
        assert_eq!(params(None).limit_or(10_000), 10_000);
        assert_eq!(params(Some("")).limit_or(10_000), 10_000);
        assert_eq!(params(Some("0")).limit_or(10_000), 10_000);
        assert_eq!(params(Some("abc")).limit_or(10_000), 10_000);
        assert_eq!(params(Some("-5")).limit_or(10_000), 10_000);
        assert_eq!(params(Some(" 250 ")).limit_or(10_000), 250);
    }

    #[test]
    fn test_blank_dates_are_unbounded() {
        let params = RankingParams {
            limit: None,
            start_date: Some(String::new()),
            end_date: Some("  ".to_string()),
        };
        assert_eq!(params.date_range().unwrap(), DateRange::unbounded());
    }

    #[test]
    fn test_inverted_dates_are_rejected() {
        let params = RankingParams {
            limit: None,
            start_date: Some("2024-05-02".to_string()),
            end_date: Some("2024-05-01".to_string()),
        };
        assert!(matches!(
            params.date_range(),
            Err(AppError::InvalidDateRange(_))
        ));
    }
}
