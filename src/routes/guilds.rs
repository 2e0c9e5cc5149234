//! Channel listing for a guild: exactly the channels a ranking run would scan.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::source::ChannelInfo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelListing {
    pub guild_id: String,
    pub channels: Vec<ChannelInfo>,
    pub channel_count: usize,
}

#[instrument(name = "guilds::channels", skip(state))]
pub async fn channels(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> Result<Json<ChannelListing>, AppError> {
    if !state.source.is_connected() {
        return Err(AppError::NotConnected);
    }

    if state.source.guild(&guild_id).await?.is_none() {
        return Err(AppError::GuildNotFound(guild_id));
    }

    let channels: Vec<ChannelInfo> = state
        .source
        .text_channels(&guild_id)
        .await?
        .into_iter()
        .filter(|c| c.viewable)
        .collect();
    Ok(Json(ChannelListing {
        guild_id,
        channel_count: channels.len(),
        channels,
    }))
}
