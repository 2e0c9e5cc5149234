use serde::{Deserialize, Serialize};

use crate::source::MemberProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub member_id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub avatar_url: String,
    pub mention_count: u64,
}

impl RankingEntry {
    pub fn new(member_id: impl Into<String>, mention_count: u64, profile: MemberProfile) -> Self {
        Self {
            member_id: member_id.into(),
            username: profile.username,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            mention_count,
        }
    }

    /// Display name when set, otherwise the username.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Final ranking of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub server_name: String,
    pub total_messages: u64,
    pub rankings: Vec<RankingEntry>,
}

impl Report {
    /// Order entries by mention count, most mentioned first. Equal counts are
    /// ordered by member id so repeated runs produce the same report.
    pub fn build(
        server_name: impl Into<String>,
        total_messages: u64,
        mut entries: Vec<RankingEntry>,
    ) -> Self {
        entries.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.member_id.cmp(&b.member_id))
        });
        Self {
            server_name: server_name.into(),
            total_messages,
            rankings: entries,
        }
    }

    /// One line per entry for the first `top` places.
    pub fn summary_lines(&self, top: usize) -> Vec<String> {
        self.rankings
            .iter()
            .take(top)
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "{}. {} (@{}): {} mentions",
                    i + 1,
                    entry.label(),
                    entry.username,
                    entry.mention_count
                )
            })
            .collect()
    }
}
