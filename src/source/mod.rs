//! Chat platform message sources.
//!
//! The aggregation pipeline never talks to the chat platform directly. It goes
//! through the [`MessageSource`] trait, which exposes exactly what a ranking run
//! needs: guild lookup, text channel listing, backward message pagination and
//! member resolution.
//!
//! Key re-exports:
//! - [`DiscordSource`] - REST client for the Discord API
//! - [`MemorySource`] - in-memory source backed by fixture data

mod discord;
mod memory;

pub use discord::DiscordSource;
pub use memory::{Fixture, FixtureError, MemorySource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A guild (server) the bot can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
}

/// A text-capable channel inside a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    /// Whether the bot may read this channel's history
    #[serde(default = "default_viewable")]
    pub viewable: bool,
}

fn default_viewable() -> bool {
    true
}

/// A member referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionedUser {
    pub id: String,
    /// Automated accounts never count towards a ranking
    #[serde(default)]
    pub bot: bool,
}

/// One message as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub mentions: Vec<MentionedUser>,
}

impl SourceMessage {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            author_is_bot: false,
            mentions: Vec::new(),
        }
    }

    /// Add human members to the mention list.
    pub fn mentioning<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentions.extend(user_ids.into_iter().map(|id| MentionedUser {
            id: id.into(),
            bot: false,
        }));
        self
    }

    /// Add an automated account to the mention list.
    pub fn mentioning_bot(mut self, user_id: impl Into<String>) -> Self {
        self.mentions.push(MentionedUser {
            id: user_id.into(),
            bot: true,
        });
        self
    }
}

/// Display metadata for a resolved member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub avatar_url: String,
}

/// Error type for chat platform operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("chat platform is not connected")]
    NotConnected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_secs:.1}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("chat platform returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("page for channel {channel_id} is not ordered newest-first at message {message_id}")]
    OutOfOrder {
        channel_id: String,
        message_id: String,
    },
}

/// Access to a chat platform's guilds, channels, history and members.
///
/// `message_page` must return messages strictly newest-first. The paginator
/// verifies this on every page with [`check_newest_first`] because its date
/// cutoff relies on it.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Whether the last connectivity check succeeded.
    fn is_connected(&self) -> bool;

    /// Re-check connectivity; called when a client asks for status while disconnected.
    async fn connect(&self) -> Result<(), SourceError>;

    async fn list_guilds(&self) -> Result<Vec<GuildInfo>, SourceError>;

    /// Look up one guild. `Ok(None)` when the bot is not a member of it.
    async fn guild(&self, guild_id: &str) -> Result<Option<GuildInfo>, SourceError>;

    /// Text-capable channels of a guild, in display order.
    async fn text_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>, SourceError>;

    /// Up to `limit` messages older than `before` (or the newest ones when `None`).
    async fn message_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceMessage>, SourceError>;

    /// Resolve a member's display metadata. `Ok(None)` when the member left the guild.
    async fn resolve_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberProfile>, SourceError>;
}

/// Verify that a page is ordered newest-first (non-increasing timestamps).
pub fn check_newest_first(channel_id: &str, page: &[SourceMessage]) -> Result<(), SourceError> {
    for pair in page.windows(2) {
        if pair[1].created_at > pair[0].created_at {
            return Err(SourceError::OutOfOrder {
                channel_id: channel_id.to_string(),
                message_id: pair[1].id.clone(),
            });
        }
    }
    Ok(())
}
