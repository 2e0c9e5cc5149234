//! In-memory message source
//!
//! Serves guilds, channels, history and members from data held in memory.
//! Used by the test suite and by `--fixture` runs, which load the same data
//! from a JSON file so the whole service can be exercised without a bot token.
//!
//! Besides plain data it can inject the failures the pipeline must tolerate:
//! channels whose fetch fails, members whose lookup fails, and pages returned
//! out of order.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChannelInfo, GuildInfo, MemberProfile, MessageSource, SourceError, SourceMessage};

/// JSON fixture layout: guilds with their channels, history and members.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub guilds: Vec<FixtureGuild>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureGuild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub channels: Vec<FixtureChannel>,
    /// Member id -> profile
    #[serde(default)]
    pub members: HashMap<String, MemberProfile>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureChannel {
    #[serde(flatten)]
    pub info: ChannelInfo,
    /// Any order; sorted newest-first on load
    #[serde(default)]
    pub messages: Vec<SourceMessage>,
}

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse fixture: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Default)]
pub struct MemorySource {
    disconnected: AtomicBool,
    guilds: Vec<GuildInfo>,
    /// Guild id -> channels in display order
    channels: HashMap<String, Vec<ChannelInfo>>,
    /// Channel id -> history, in the order pages are served
    messages: HashMap<String, Vec<SourceMessage>>,
    /// (guild id, member id) -> profile
    members: HashMap<(String, String), MemberProfile>,
    /// Channel id -> pages served before every fetch fails
    failing_channels: HashMap<String, usize>,
    failing_members: HashSet<String>,
    page_delay: Option<Duration>,
    page_fetches: Mutex<HashMap<String, usize>>,
    member_lookups: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut source = Self::new();
        for guild in fixture.guilds {
            source = source.with_guild(&guild.id, &guild.name);
            for channel in guild.channels {
                let channel_id = channel.info.id.clone();
                source = source
                    .with_channel(&guild.id, channel.info)
                    .with_messages(&channel_id, channel.messages);
            }
            for (member_id, profile) in guild.members {
                source = source.with_member(&guild.id, &member_id, profile);
            }
        }
        source
    }

    pub fn from_fixture_file<P: AsRef<Path>>(path: P) -> Result<Self, FixtureError> {
        let contents = std::fs::read_to_string(path)?;
        let fixture: Fixture = serde_json::from_str(&contents)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_guild(mut self, id: &str, name: &str) -> Self {
        self.guilds.push(GuildInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_channel(mut self, guild_id: &str, channel: ChannelInfo) -> Self {
        self.channels
            .entry(guild_id.to_string())
            .or_default()
            .push(channel);
        self
    }

    /// Add history to a channel; the whole history is kept newest-first.
    pub fn with_messages(mut self, channel_id: &str, messages: Vec<SourceMessage>) -> Self {
        let history = self.messages.entry(channel_id.to_string()).or_default();
        history.extend(messages);
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        self
    }

    /// Replace a channel's history with messages served exactly in the given order.
    pub fn with_unordered_messages(mut self, channel_id: &str, messages: Vec<SourceMessage>) -> Self {
        self.messages.insert(channel_id.to_string(), messages);
        self
    }

    pub fn with_member(mut self, guild_id: &str, member_id: &str, profile: MemberProfile) -> Self {
        self.members
            .insert((guild_id.to_string(), member_id.to_string()), profile);
        self
    }

    /// Every page fetch for this channel fails.
    pub fn with_failing_channel(self, channel_id: &str) -> Self {
        self.with_failing_channel_after(channel_id, 0)
    }

    /// Serve `pages` pages of this channel, then fail every later fetch.
    pub fn with_failing_channel_after(mut self, channel_id: &str, pages: usize) -> Self {
        self.failing_channels.insert(channel_id.to_string(), pages);
        self
    }

    /// Every lookup of this member fails with a transport error.
    pub fn with_failing_member(mut self, member_id: &str) -> Self {
        self.failing_members.insert(member_id.to_string());
        self
    }

    /// Sleep before serving each page.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    pub fn disconnected(self) -> Self {
        self.disconnected.store(true, Ordering::Relaxed);
        self
    }

    /// Number of pages served for a channel so far.
    pub fn page_fetches(&self, channel_id: &str) -> usize {
        self.page_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of member lookups served so far.
    pub fn member_lookups(&self) -> usize {
        self.member_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<(), SourceError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SourceError::NotConnected)
        }
    }

    async fn list_guilds(&self) -> Result<Vec<GuildInfo>, SourceError> {
        Ok(self.guilds.clone())
    }

    async fn guild(&self, guild_id: &str) -> Result<Option<GuildInfo>, SourceError> {
        Ok(self.guilds.iter().find(|g| g.id == guild_id).cloned())
    }

    async fn text_channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>, SourceError> {
        if !self.guilds.iter().any(|g| g.id == guild_id) {
            return Err(SourceError::NotFound(format!("guild {}", guild_id)));
        }
        Ok(self.channels.get(guild_id).cloned().unwrap_or_default())
    }

    async fn message_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }

        let served = {
            let mut fetches = self
                .page_fetches
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = fetches.entry(channel_id.to_string()).or_default();
            *count += 1;
            *count - 1
        };

        if self
            .failing_channels
            .get(channel_id)
            .is_some_and(|&pages| served >= pages)
        {
            return Err(SourceError::Status {
                status: 403,
                message: "Missing Access".to_string(),
            });
        }

        let Some(history) = self.messages.get(channel_id) else {
            return Ok(Vec::new());
        };

        let start = match before {
            None => 0,
            Some(cursor) => match history.iter().position(|m| m.id == cursor) {
                Some(index) => index + 1,
                None => return Ok(Vec::new()),
            },
        };

        Ok(history.iter().skip(start).take(limit).cloned().collect())
    }

    async fn resolve_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<MemberProfile>, SourceError> {
        self.member_lookups.fetch_add(1, Ordering::Relaxed);

        if self.failing_members.contains(user_id) {
            return Err(SourceError::Transport("connection reset".to_string()));
        }

        Ok(self
            .members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: &str, minute: u32) -> SourceMessage {
        SourceMessage::new(id, Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap())
    }

    #[tokio::test]
    async fn test_pages_walk_backwards_with_cursor() {
        let source = MemorySource::new()
            .with_guild("g", "Guild")
            .with_messages("c", (0..5).map(|i| message(&format!("m{}", i), i)).collect());

        let first = source.message_page("c", None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m4", "m3"]
        );

        let second = source.message_page("c", Some("m3"), 2).await.unwrap();
        assert_eq!(
            second.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m1"]
        );

        let last = source.message_page("c", Some("m1"), 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(source.page_fetches("c"), 3);
    }

    #[tokio::test]
    async fn test_unknown_channel_has_no_history() {
        let source = MemorySource::new();
        assert!(source.message_page("nope", None, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_channel_and_member() {
        let source = MemorySource::new()
            .with_guild("g", "Guild")
            .with_failing_channel("c")
            .with_failing_member("u");
        assert!(source.message_page("c", None, 100).await.is_err());
        assert!(source.resolve_member("g", "u").await.is_err());
        assert_eq!(source.resolve_member("g", "other").await.unwrap(), None);
        assert_eq!(source.member_lookups(), 2);
    }

    #[tokio::test]
    async fn test_channel_fails_after_served_pages() {
        let source = MemorySource::new()
            .with_messages("c", (0..5).map(|i| message(&format!("m{}", i), i)).collect())
            .with_failing_channel_after("c", 1);

        assert_eq!(source.message_page("c", None, 2).await.unwrap().len(), 2);
        assert!(source.message_page("c", Some("m3"), 2).await.is_err());
        assert!(source.message_page("c", Some("m3"), 2).await.is_err());
    }

    #[test]
    fn test_fixture_is_sorted_newest_first() {
        let json = r#"{
            "guilds": [{
                "id": "g1",
                "name": "Test Guild",
                "channels": [{
                    "id": "c1",
                    "name": "general",
                    "messages": [
                        {"id": "1", "created_at": "2024-01-01T00:00:00Z", "mentions": [{"id": "u1"}]},
                        {"id": "2", "created_at": "2024-01-02T00:00:00Z"}
                    ]
                }],
                "members": {
                    "u1": {"username": "alice", "avatar_url": "https://example.com/a.png"}
                }
            }]
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let source = MemorySource::from_fixture(fixture);

        let history = &source.messages["c1"];
        assert_eq!(history[0].id, "2");
        assert_eq!(history[1].id, "1");
        assert!(source.channels["g1"][0].viewable);
        assert!(source.members.contains_key(&("g1".to_string(), "u1".to_string())));
    }

    #[test]
    fn test_fixture_file_missing() {
        assert!(matches!(
            MemorySource::from_fixture_file("/nonexistent/fixture.json"),
            Err(FixtureError::Io(_))
        ));
    }
}
