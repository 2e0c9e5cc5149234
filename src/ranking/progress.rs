use crate::source::SourceError;

use super::{DateRange, Report};

/// Events emitted by the pipeline while a run makes progress.
///
/// Counter fields on `BatchScanned` are deltas for that batch; everything else
/// is a snapshot.
pub enum ProgressEvent<'a> {
    RunStarted {
        guild_id: &'a str,
        server_name: &'a str,
        limit: usize,
        range: &'a DateRange,
    },
    ChannelsListed {
        total: usize,
    },
    /// `index` is 1-based
    ChannelStarted {
        index: usize,
        total: usize,
        name: &'a str,
    },
    BatchScanned {
        channel: &'a str,
        /// Messages fetched from this channel so far, in range or not
        fetched: usize,
        messages: u64,
        mentions: u64,
        /// A multiple of the log interval was crossed by this batch
        milestone: bool,
    },
    ChannelFinished {
        name: &'a str,
        messages: u64,
        mentions: u64,
        filtered: bool,
    },
    ChannelFailed {
        name: &'a str,
        error: &'a SourceError,
    },
    ScanFinished {
        total_messages: u64,
    },
    EnrichmentStarted {
        members: usize,
    },
    MemberProcessed {
        processed: usize,
    },
    EnrichmentFinished {
        resolved: usize,
    },
    Summary {
        report: &'a Report,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{ProgressEvent, ProgressReporter};

    /// Records every event as a compact string.
    #[derive(Default)]
    pub struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl RecordingProgress {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: ProgressEvent<'_>) {
            let line = match event {
                ProgressEvent::RunStarted { guild_id, .. } => format!("run_started:{}", guild_id),
                ProgressEvent::ChannelsListed { total } => format!("channels:{}", total),
                ProgressEvent::ChannelStarted { index, total, name } => {
                    format!("channel_started:{}/{}:{}", index, total, name)
                }
                ProgressEvent::BatchScanned {
                    channel,
                    fetched,
                    messages,
                    mentions,
                    milestone,
                } => format!(
                    "batch:{}:{}:{}:{}{}",
                    channel,
                    fetched,
                    messages,
                    mentions,
                    if milestone { ":milestone" } else { "" }
                ),
                ProgressEvent::ChannelFinished {
                    name,
                    messages,
                    mentions,
                    ..
                } => format!("channel_finished:{}:{}:{}", name, messages, mentions),
                ProgressEvent::ChannelFailed { name, .. } => format!("channel_failed:{}", name),
                ProgressEvent::ScanFinished { total_messages } => {
                    format!("scan_finished:{}", total_messages)
                }
                ProgressEvent::EnrichmentStarted { members } => format!("enrichment:{}", members),
                ProgressEvent::MemberProcessed { processed } => format!("member:{}", processed),
                ProgressEvent::EnrichmentFinished { resolved } => format!("resolved:{}", resolved),
                ProgressEvent::Summary { report } => format!("summary:{}", report.rankings.len()),
            };
            self.events.lock().unwrap().push(line);
        }
    }
}
