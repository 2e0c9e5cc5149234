//! Liveness probe.
//!
//! Answers 200 whenever the process can serve HTTP. The body also reports
//! whether the bot is connected and how many rankings are running, but a
//! disconnected bot does not fail the probe.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connected: bool,
    pub running_jobs: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connected: state.source.is_connected(),
        running_jobs: state.jobs.running(),
    })
}
