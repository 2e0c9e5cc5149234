//! Discord REST API source
//!
//! Talks to the Discord HTTP API (v10) with a bot token. No gateway connection
//! is kept: "connected" means the token was accepted by the last
//! `GET /users/@me` probe.
//!
//! Rate limits are not retried here. A 429 surfaces as
//! [`SourceError::RateLimited`] and the pipeline treats it like any other
//! per-channel or per-member failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use crate::config::{DiscordConfig, AVATAR_SIZE, DISCORD_CDN_BASE};

use super::{ChannelInfo, GuildInfo, MemberProfile, MentionedUser, MessageSource, SourceError, SourceMessage};

/// Channel types whose history can be read as messages
/// (guild text, voice text chat, announcement, stage text chat).
const TEXT_CHANNEL_TYPES: [u8; 4] = [0, 2, 5, 13];

/// Largest page `GET /users/@me/guilds` returns
const GUILD_PAGE_SIZE: usize = 200;

/// Number of default avatars on the CDN
const DEFAULT_AVATAR_COUNT: u64 = 6;

#[derive(Debug, Deserialize)]
struct WireGuild {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    position: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    timestamp: DateTime<Utc>,
    author: WireUser,
    #[serde(default)]
    mentions: Vec<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    #[serde(default)]
    user: Option<WireUser>,
    #[serde(default)]
    nick: Option<String>,
}

impl From<WireMessage> for SourceMessage {
    fn from(message: WireMessage) -> Self {
        Self {
            id: message.id,
            created_at: message.timestamp,
            author_is_bot: message.author.bot,
            mentions: message
                .mentions
                .into_iter()
                .map(|user| MentionedUser {
                    id: user.id,
                    bot: user.bot,
                })
                .collect(),
        }
    }
}

/// Accept only numeric snowflake ids; anything else never reaches a request path.
fn snowflake(id: &str) -> Result<&str, SourceError> {
    if !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(SourceError::NotFound(format!("invalid id {:?}", id)))
    }
}

/// CDN URL of a user's avatar, falling back to the default avatar for the id.
fn avatar_url(user: &WireUser) -> String {
    match user.avatar.as_deref() {
        Some(hash) => {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!(
                "{}/avatars/{}/{}.{}?size={}",
                DISCORD_CDN_BASE, user.id, hash, ext, AVATAR_SIZE
            )
        }
        None => {
            let index = user
                .id
                .parse::<u64>()
                .map(|snowflake| (snowflake >> 22) % DEFAULT_AVATAR_COUNT)
                .unwrap_or(0);
            format!("{}/embed/avatars/{}.png", DISCORD_CDN_BASE, index)
        }
    }
}

/// Guild nickname, then global display name, then username.
fn display_name(member: &WireMember, user: &WireUser) -> Option<String> {
    member
        .nick
        .clone()
        .or_else(|| user.global_name.clone())
        .or_else(|| Some(user.username.clone()))
}

pub struct DiscordSource {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    connected: AtomicBool,
}

impl DiscordSource {
    pub fn new(config: &DiscordConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("rollcall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
            connected: AtomicBool::new(false),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let token = self.token.as_deref().ok_or(SourceError::NotConnected)?;

        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .header(AUTHORIZATION, format!("Bot {}", token))
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(path.to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);
            tracing::warn!(%path, retry_after_secs, "Discord rate limit hit");
            return Err(SourceError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED {
            self.connected.store(false, Ordering::Relaxed);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MessageSource for DiscordSource {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[instrument(name = "discord.connect", skip(self))]
    async fn connect(&self) -> Result<(), SourceError> {
        let result = self.get_json::<WireUser>("/users/@me", &[]).await;
        match &result {
            Ok(user) => {
                tracing::info!(bot = %user.username, id = %user.id, "Connected to Discord");
                self.connected.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discord connectivity check failed");
                self.connected.store(false, Ordering::Relaxed);
            }
        }
        result.map(|_| ())
    }

    #[instrument(name = "discord.list_guilds", skip(self))]
    async fn list_guilds(&self) -> Result<Vec<GuildInfo>, SourceError> {
        let mut guilds = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut query = vec![("limit", GUILD_PAGE_SIZE.to_string())];
            if let Some(after) = &after {
                query.push(("after", after.clone()));
            }
            let page: Vec<WireGuild> = self.get_json("/users/@me/guilds", &query).await?;
            let full = page.len() >= GUILD_PAGE_SIZE;
            after = page.last().map(|g| g.id.clone());
            guilds.extend(page.into_iter().map(|g| GuildInfo {
                id: g.id,
                name: g.name,
            }));
            if !full || after.is_none() {
                break;
            }
        }
        Ok(guilds)
    }

    #[instrument(name = "discord.guild", skip(self))]
    async fn guild(&self, guild_id: &str) -> Result<Option<GuildInfo>, SourceError> {
        let Ok(guild_id) = snowflake(guild_id) else {
            return Ok(None);
        };
        match self
            .get_json::<WireGuild>(&format!("/guilds/{}", guild_id), &[])
            .await
        {
            Ok(g) => Ok(Some(GuildInfo {
                id: g.id,
                name: g.name,
            })),
            Err(SourceError::NotFound(_)) => Ok(None),
            // The API answers 403 for guilds the bot is not a member of
            Err(SourceError::Status { status: 403, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(name = "discord.text_channels", skip(self))]
    async fn text_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>, SourceError> {
        let mut channels: Vec<WireChannel> = self
            .get_json(&format!("/guilds/{}/channels", snowflake(guild_id)?), &[])
            .await?;
        channels.retain(|c| TEXT_CHANNEL_TYPES.contains(&c.kind));
        channels.sort_by_key(|c| c.position.unwrap_or(i64::MAX));

        // Read permission is not computed from overwrites; channels the bot
        // cannot read fail on fetch and are skipped by the paginator.
        Ok(channels
            .into_iter()
            .map(|c| ChannelInfo {
                name: c.name.unwrap_or_else(|| c.id.clone()),
                id: c.id,
                viewable: true,
            })
            .collect())
    }

    #[instrument(name = "discord.message_page", skip(self), fields(count))]
    async fn message_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        let channel_id = snowflake(channel_id)?;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", snowflake(before)?.to_string()));
        }

        let messages: Vec<WireMessage> = self
            .get_json(&format!("/channels/{}/messages", channel_id), &query)
            .await?;
        tracing::Span::current().record("count", messages.len());

        Ok(messages.into_iter().map(SourceMessage::from).collect())
    }

    #[instrument(name = "discord.resolve_member", skip(self))]
    async fn resolve_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberProfile>, SourceError> {
        let member = match self
            .get_json::<WireMember>(
                &format!("/guilds/{}/members/{}", snowflake(guild_id)?, snowflake(user_id)?),
                &[],
            )
            .await
        {
            Ok(member) => member,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(user) = member.user.as_ref() else {
            return Ok(None);
        };

        Ok(Some(MemberProfile {
            username: user.username.clone(),
            display_name: display_name(&member, user),
            avatar_url: avatar_url(user),
        }))
    }
}
