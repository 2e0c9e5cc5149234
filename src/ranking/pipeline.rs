use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::{
    RankingConfig, DEFAULT_ENRICHMENT_CONCURRENCY, FETCH_LOG_INTERVAL, MESSAGE_PAGE_SIZE,
};
use crate::source::{MessageSource, SourceError};

use super::paginator::{ChannelPaginator, ScanError};
use super::progress::{ProgressEvent, ProgressReporter};
use super::{DateRange, MemberDirectory, MentionTally, Report};

/// Parameters of one ranking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingRequest {
    pub guild_id: String,
    /// Per-channel message budget
    pub limit: usize,
    pub range: DateRange,
}

impl RankingRequest {
    pub fn new(guild_id: impl Into<String>, limit: usize, range: DateRange) -> Self {
        Self {
            guild_id: guild_id.into(),
            limit,
            range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub page_size: usize,
    pub log_interval: usize,
    pub enrichment_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: MESSAGE_PAGE_SIZE,
            log_interval: FETCH_LOG_INTERVAL,
            enrichment_concurrency: DEFAULT_ENRICHMENT_CONCURRENCY,
        }
    }
}

impl From<&RankingConfig> for PipelineSettings {
    fn from(config: &RankingConfig) -> Self {
        Self {
            page_size: config.page_size,
            log_interval: config.log_interval,
            enrichment_concurrency: config.enrichment_concurrency,
        }
    }
}

/// Errors that end a run. Channel and member failures never get here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to list channels: {0}")]
    Channels(#[source] SourceError),

    #[error("cancelled")]
    Cancelled,
}

/// Runs the scan, enrichment and ranking phases for a job.
pub struct RankingPipeline {
    source: Arc<dyn MessageSource>,
    members: MemberDirectory,
    settings: PipelineSettings,
}

impl RankingPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        members: MemberDirectory,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            members,
            settings,
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    #[instrument(
        name = "ranking.run",
        skip(self, request, progress, cancel),
        fields(guild_id = %request.guild_id, limit = request.limit)
    )]
    pub async fn run(
        &self,
        request: &RankingRequest,
        server_name: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Report, PipelineError> {
        progress.report(ProgressEvent::RunStarted {
            guild_id: &request.guild_id,
            server_name,
            limit: request.limit,
            range: &request.range,
        });

        let channels: Vec<_> = self
            .source
            .text_channels(&request.guild_id)
            .await
            .map_err(PipelineError::Channels)?
            .into_iter()
            .filter(|c| c.viewable)
            .collect();
        let total = channels.len();
        progress.report(ProgressEvent::ChannelsListed { total });

        let paginator = ChannelPaginator::new(
            self.source.as_ref(),
            &request.range,
            request.limit,
            self.settings.page_size,
            self.settings.log_interval,
        );

        let mut tally = MentionTally::new();
        let mut total_messages = 0u64;

        for (index, channel) in channels.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            progress.report(ProgressEvent::ChannelStarted {
                index: index + 1,
                total,
                name: &channel.name,
            });

            match paginator.scan(channel, &mut tally, progress, cancel).await {
                Ok(scan) => {
                    total_messages += scan.messages;
                    progress.report(ProgressEvent::ChannelFinished {
                        name: &channel.name,
                        messages: scan.messages,
                        mentions: scan.mentions,
                        filtered: request.range.is_bounded(),
                    });
                }
                Err(ScanError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(ScanError::Source {
                    error, messages, ..
                }) => {
                    total_messages += messages;
                    warn!(
                        channel_id = %channel.id,
                        channel = %channel.name,
                        kept_messages = messages,
                        error = %error,
                        "Skipping channel"
                    );
                    progress.report(ProgressEvent::ChannelFailed {
                        name: &channel.name,
                        error: &error,
                    });
                }
            }
        }
        progress.report(ProgressEvent::ScanFinished { total_messages });
        info!(
            total_messages,
            members = tally.len(),
            "Scanned {} channels",
            total
        );

        let entries = self
            .members
            .enrich(
                &request.guild_id,
                tally,
                self.settings.enrichment_concurrency,
                progress,
                cancel,
            )
            .await?;

        let report = Report::build(server_name, total_messages, entries);
        progress.report(ProgressEvent::Summary { report: &report });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::ranking::progress::testing::RecordingProgress;
    use crate::source::{ChannelInfo, MemberProfile, MemorySource, SourceMessage};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn channel(id: &str) -> ChannelInfo {
        ChannelInfo {
            id: id.to_string(),
            name: id.to_string(),
            viewable: true,
        }
    }

    fn profile(name: &str) -> MemberProfile {
        MemberProfile {
            username: name.to_string(),
            display_name: None,
            avatar_url: format!("https://cdn.example/{}.png", name),
        }
    }

    /// Channel A: three messages mentioning U1. Channel B: one mentioning U1 and U2.
    fn two_channel_guild() -> MemorySource {
        MemorySource::new()
            .with_guild("g", "Guild")
            .with_channel("g", channel("a"))
            .with_channel("g", channel("b"))
            .with_messages(
                "a",
                vec![
                    SourceMessage::new("a3", base()).mentioning(["u1"]),
                    SourceMessage::new("a2", base() - Duration::days(1)).mentioning(["u1"]),
                    SourceMessage::new("a1", base() - Duration::days(2)).mentioning(["u1"]),
                ],
            )
            .with_messages(
                "b",
                vec![SourceMessage::new("b1", base()).mentioning(["u1", "u2"])],
            )
            .with_member("g", "u1", profile("alice"))
            .with_member("g", "u2", profile("bob"))
    }

    fn pipeline(source: MemorySource) -> RankingPipeline {
        let source: Arc<dyn MessageSource> = Arc::new(source);
        let members = MemberDirectory::new(source.clone(), &CacheConfig::default());
        RankingPipeline::new(source, members, PipelineSettings::default())
    }

    async fn run(pipeline: &RankingPipeline, request: &RankingRequest) -> (Report, Vec<String>) {
        let progress = RecordingProgress::default();
        let report = pipeline
            .run(request, "Guild", &progress, &CancellationToken::new())
            .await
            .unwrap();
        (report, progress.events())
    }

    #[tokio::test]
    async fn test_two_channel_ranking() {
        let pipeline = pipeline(two_channel_guild());
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (report, _) = run(&pipeline, &request).await;

        assert_eq!(report.server_name, "Guild");
        assert_eq!(report.total_messages, 4);
        let ranking: Vec<(&str, u64)> = report
            .rankings
            .iter()
            .map(|e| (e.member_id.as_str(), e.mention_count))
            .collect();
        assert_eq!(ranking, vec![("u1", 4), ("u2", 1)]);
        assert_eq!(report.rankings[0].username, "alice");
    }

    #[tokio::test]
    async fn test_start_date_keeps_only_newest_message() {
        let pipeline = pipeline(two_channel_guild());
        let range = DateRange {
            start: Some(base() - Duration::hours(12)),
            end: None,
        };
        let request = RankingRequest::new("g", 10_000, range);

        let (report, events) = run(&pipeline, &request).await;

        assert!(events.contains(&"channel_finished:a:1:1".to_string()));
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.rankings[0].mention_count, 2);
    }

    #[tokio::test]
    async fn test_failed_member_still_counted_in_mentions() {
        let source = two_channel_guild().with_failing_member("u2");
        let pipeline = pipeline(source);
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (report, events) = run(&pipeline, &request).await;

        assert_eq!(report.rankings.len(), 1);
        assert_eq!(report.rankings[0].member_id, "u1");
        assert!(events.contains(&"channel_finished:b:1:2".to_string()));
        assert!(events.contains(&"enrichment:2".to_string()));
    }

    #[tokio::test]
    async fn test_failing_channel_is_skipped() {
        let source = two_channel_guild()
            .with_channel("g", channel("secret"))
            .with_failing_channel("secret");
        let pipeline = pipeline(source);
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (report, events) = run(&pipeline, &request).await;

        assert!(events.contains(&"channel_failed:secret".to_string()));
        assert_eq!(report.total_messages, 4);
        assert_eq!(report.rankings.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_failing_after_first_page_keeps_its_messages() {
        let history = (0..150)
            .map(|i| {
                SourceMessage::new(format!("f{:03}", i), base() - Duration::minutes(i))
                    .mentioning(["u2"])
            })
            .collect();
        let source = two_channel_guild()
            .with_channel("g", channel("flaky"))
            .with_messages("flaky", history)
            .with_failing_channel_after("flaky", 1);
        let pipeline = pipeline(source);
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (report, events) = run(&pipeline, &request).await;

        assert!(events.contains(&"channel_failed:flaky".to_string()));
        assert_eq!(report.total_messages, 104);
        assert_eq!(report.rankings[0].member_id, "u2");
        assert_eq!(report.rankings[0].mention_count, 101);
    }

    #[tokio::test]
    async fn test_unviewable_channels_are_not_scanned() {
        let source = two_channel_guild().with_channel(
            "g",
            ChannelInfo {
                id: "hidden".to_string(),
                name: "hidden".to_string(),
                viewable: false,
            },
        );
        let pipeline = pipeline(source);
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (_, events) = run(&pipeline, &request).await;

        assert!(events.contains(&"channels:2".to_string()));
        assert!(!events.iter().any(|e| e.contains("hidden")));
    }

    #[tokio::test]
    async fn test_channel_progress_is_monotonic_and_bounded() {
        let pipeline = pipeline(two_channel_guild());
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (_, events) = run(&pipeline, &request).await;

        let started: Vec<&str> = events
            .iter()
            .filter_map(|e| e.strip_prefix("channel_started:"))
            .collect();
        assert_eq!(started, vec!["1/2:a", "2/2:b"]);
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_report() {
        let pipeline = pipeline(two_channel_guild());
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (first, _) = run(&pipeline, &request).await;
        let (second, _) = run(&pipeline, &request).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_bot_mentions_are_excluded() {
        let source = MemorySource::new()
            .with_guild("g", "Guild")
            .with_channel("g", channel("a"))
            .with_messages(
                "a",
                vec![SourceMessage::new("m", base()).mentioning(["u1"]).mentioning_bot("bot")],
            )
            .with_member("g", "u1", profile("alice"));
        let pipeline = pipeline(source);
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());

        let (report, events) = run(&pipeline, &request).await;

        assert_eq!(report.rankings.len(), 1);
        assert!(events.contains(&"enrichment:1".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_guild_fails_run() {
        let pipeline = pipeline(MemorySource::new());
        let request = RankingRequest::new("missing", 10_000, DateRange::unbounded());

        let result = pipeline
            .run(&request, "x", &RecordingProgress::default(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::Channels(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let pipeline = pipeline(two_channel_guild());
        let request = RankingRequest::new("g", 10_000, DateRange::unbounded());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline
            .run(&request, "Guild", &RecordingProgress::default(), &cancel)
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
