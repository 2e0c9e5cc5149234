//! Member resolution with positive and negative caching.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use moka::future::Cache;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{CacheConfig, NEGATIVE_CACHE_SIZE_DIVISOR};
use crate::source::{MemberProfile, MessageSource, SourceError};

use super::pipeline::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};
use super::{MentionTally, RankingEntry};

/// Resolves member ids to display metadata, shared by every job.
///
/// Found members are cached for the member TTL, members that left the guild
/// for the shorter negative TTL. Lookup errors are never cached.
#[derive(Clone)]
pub struct MemberDirectory {
    source: Arc<dyn MessageSource>,
    profiles: Cache<String, MemberProfile>,
    not_found: Cache<String, ()>,
}

fn cache_key(guild_id: &str, member_id: &str) -> String {
    format!("{}:{}", guild_id, member_id)
}

impl MemberDirectory {
    pub fn new(source: Arc<dyn MessageSource>, config: &CacheConfig) -> Self {
        let profiles = Cache::builder()
            .max_capacity(config.max_members)
            .time_to_live(Duration::from_secs(config.member_ttl_seconds))
            .build();

        let not_found = Cache::builder()
            .max_capacity((config.max_members / NEGATIVE_CACHE_SIZE_DIVISOR).max(1))
            .time_to_live(Duration::from_secs(config.member_negative_ttl_seconds))
            .build();

        Self {
            source,
            profiles,
            not_found,
        }
    }

    /// Look up one member. `Ok(None)` when the member is no longer in the guild.
    #[instrument(
        name = "members.resolve",
        skip(self),
        fields(cache_hit = false, duration_ms)
    )]
    pub async fn resolve(
        &self,
        guild_id: &str,
        member_id: &str,
    ) -> Result<Option<MemberProfile>, SourceError> {
        let start = Instant::now();
        let key = cache_key(guild_id, member_id);

        if let Some(profile) = self.profiles.get(&key).await {
            tracing::Span::current().record("cache_hit", true);
            return Ok(Some(profile));
        }
        if self.not_found.get(&key).await.is_some() {
            tracing::Span::current().record("cache_hit", true);
            return Ok(None);
        }

        let result = self.source.resolve_member(guild_id, member_id).await;
        tracing::Span::current().record("duration_ms", start.elapsed().as_millis() as u64);

        match result {
            Ok(Some(profile)) => {
                self.profiles.insert(key, profile.clone()).await;
                Ok(Some(profile))
            }
            Ok(None) => {
                tracing::debug!("Member not found, caching negative result");
                self.not_found.insert(key, ()).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve every tallied member into a ranking entry.
    ///
    /// Members that cannot be resolved are dropped. Lookups run `concurrency`
    /// at a time; progress is reported once per attempt.
    pub async fn enrich(
        &self,
        guild_id: &str,
        tally: MentionTally,
        concurrency: usize,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankingEntry>, PipelineError> {
        let entries = tally.into_sorted_entries();
        progress.report(ProgressEvent::EnrichmentStarted {
            members: entries.len(),
        });

        let mut lookups = stream::iter(entries)
            .map(|(member_id, count)| async move {
                let profile = self.resolve(guild_id, &member_id).await;
                (member_id, count, profile)
            })
            .buffered(concurrency.max(1));

        let mut resolved = Vec::new();
        let mut processed = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = lookups.next() => next,
            };
            let Some((member_id, count, profile)) = next else {
                break;
            };

            match profile {
                Ok(Some(profile)) => resolved.push(RankingEntry::new(member_id, count, profile)),
                Ok(None) => {
                    tracing::debug!(%member_id, "Dropping member who left the guild");
                }
                Err(e) => {
                    tracing::warn!(%member_id, error = %e, "Failed to resolve member, dropping");
                }
            }
            processed += 1;
            progress.report(ProgressEvent::MemberProcessed { processed });
        }

        progress.report(ProgressEvent::EnrichmentFinished {
            resolved: resolved.len(),
        });
        Ok(resolved)
    }
}
