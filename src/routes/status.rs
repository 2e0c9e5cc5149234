//! Bot connectivity and the guilds a ranking can be requested for.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::instrument;

use crate::source::GuildInfo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub guilds: Vec<GuildInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    fn disconnected(error: String) -> Self {
        Self {
            connected: false,
            guilds: Vec::new(),
            error: Some(error),
        }
    }
}

/// Reports whether the bot is connected and lists its guilds.
///
/// A disconnected source gets one reconnect attempt per call.
#[instrument(name = "status::status", skip(state))]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    if !state.source.is_connected() {
        if let Err(e) = state.source.connect().await {
            tracing::debug!(error = %e, "Chat platform still unreachable");
            return Json(StatusResponse::disconnected(e.to_string()));
        }
        tracing::info!("Reconnected to chat platform");
    }

    match state.source.list_guilds().await {
        Ok(guilds) => Json(StatusResponse {
            connected: true,
            guilds,
            error: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list guilds");
            Json(StatusResponse::disconnected(e.to_string()))
        }
    }
}
