//! Backward pagination over one channel's history.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{check_newest_first, ChannelInfo, MessageSource, SourceError};

use super::progress::{ProgressEvent, ProgressReporter};
use super::{DateRange, MentionTally};

/// Why a channel scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source returned a short or empty page
    Exhausted,
    /// The per-channel message budget was used up
    BudgetSpent,
    /// A message older than the start bound was reached
    ReachedStart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScan {
    /// Messages fetched, in range or not
    pub fetched: usize,
    /// Messages inside the date range
    pub messages: u64,
    /// Member credits added to the tally
    pub mentions: u64,
    pub stop: StopReason,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A fetch failed. `messages` and `mentions` cover the batches counted
    /// before the failure, which stay in the tally.
    #[error("{error}")]
    Source {
        #[source]
        error: SourceError,
        messages: u64,
        mentions: u64,
    },

    #[error("scan cancelled")]
    Cancelled,
}

/// Walks channels newest-to-oldest under a fixed budget and date range.
pub struct ChannelPaginator<'a> {
    source: &'a dyn MessageSource,
    range: &'a DateRange,
    limit: usize,
    page_size: usize,
    log_interval: usize,
}

impl<'a> ChannelPaginator<'a> {
    pub fn new(
        source: &'a dyn MessageSource,
        range: &'a DateRange,
        limit: usize,
        page_size: usize,
        log_interval: usize,
    ) -> Self {
        Self {
            source,
            range,
            limit,
            page_size: page_size.max(1),
            log_interval,
        }
    }

    /// Scan one channel into `tally`.
    ///
    /// Batches already counted stay in the tally when a later page fails.
    pub async fn scan(
        &self,
        channel: &ChannelInfo,
        tally: &mut MentionTally,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ChannelScan, ScanError> {
        let mut before: Option<String> = None;
        let mut fetched = 0usize;
        let mut messages = 0u64;
        let mut mentions = 0u64;

        let stop = loop {
            let remaining = self.limit.saturating_sub(fetched);
            if remaining == 0 {
                break StopReason::BudgetSpent;
            }
            let requested = remaining.min(self.page_size);

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                page = self.source.message_page(&channel.id, before.as_deref(), requested) => page,
            };
            let page = match page.and_then(|p| check_newest_first(&channel.id, &p).map(|()| p)) {
                Ok(page) => page,
                Err(error) => {
                    return Err(ScanError::Source {
                        error,
                        messages,
                        mentions,
                    })
                }
            };

            let Some(oldest) = page.last() else {
                break StopReason::Exhausted;
            };

            let previous = fetched;
            fetched += page.len();

            let mut batch_messages = 0u64;
            let mut batch_mentions = 0u64;
            let mut reached_start = false;
            for message in &page {
                if self.range.is_before_start(message.created_at) {
                    reached_start = true;
                    break;
                }
                if self.range.is_after_end(message.created_at) {
                    continue;
                }
                batch_messages += 1;
                batch_mentions += tally.record_message(&message.mentions);
            }
            messages += batch_messages;
            mentions += batch_mentions;

            progress.report(ProgressEvent::BatchScanned {
                channel: &channel.name,
                fetched,
                messages: batch_messages,
                mentions: batch_mentions,
                milestone: self.log_interval > 0
                    && fetched / self.log_interval > previous / self.log_interval,
            });

            if reached_start {
                break StopReason::ReachedStart;
            }
            if page.len() < requested {
                break StopReason::Exhausted;
            }
            before = Some(oldest.id.clone());
        };

        debug!(
            channel_id = %channel.id,
            fetched,
            messages,
            mentions,
            stop = ?stop,
            "Channel scan finished"
        );

        Ok(ChannelScan {
            fetched,
            messages,
            mentions,
            stop,
        })
    }
}
