use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SUMMARY_TOP_N;
use crate::ranking::{ProgressEvent, ProgressReporter, Report};

use super::{JobStatus, JobStore};

/// Write access to one job, held by the task running it.
#[derive(Clone)]
pub struct JobHandle {
    job_id: String,
    store: JobStore,
    cancel: CancellationToken,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl JobHandle {
    pub(super) fn new(job_id: String, store: JobStore, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            store,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.job_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Append a line to the job log.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.job_id, "{}", message);
        self.store.update(&self.job_id, |job| job.logs.push(message));
    }

    pub fn complete(&self, report: Report) {
        self.store.update(&self.job_id, |job| {
            job.status = JobStatus::Completed;
            job.current_channel.clear();
            job.result = Some(Arc::new(report));
        });
    }

    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.store.update(&self.job_id, |job| {
            job.logs.push(format!("Error: {}", error));
            job.status = JobStatus::Error;
            job.current_channel.clear();
            job.error = Some(error);
        });
    }

    /// Drop the job from the store after the configured retention.
    pub fn schedule_eviction(&self) {
        self.store
            .schedule_eviction(&self.job_id, self.store.retention());
    }
}

impl ProgressReporter for JobHandle {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::RunStarted {
                guild_id,
                server_name,
                limit,
                range,
            } => {
                self.log("=== Mention ranking started ===");
                self.log(format!("Server: {} (ID: {})", server_name, guild_id));
                self.log(format!("Message limit per channel: {}", limit));
                if let Some(period) = range.describe() {
                    self.log(format!("Period: {}", period));
                }
            }
            ProgressEvent::ChannelsListed { total } => {
                self.store.update(&self.job_id, |job| {
                    job.total_channels = total;
                    job.logs.push(format!("Text channels to scan: {}", total));
                });
            }
            ProgressEvent::ChannelStarted { index, total, name } => {
                self.store.update(&self.job_id, |job| {
                    job.current_channel = name.to_string();
                    job.processed_channels = job.processed_channels.max(index).min(job.total_channels);
                    job.logs.push(format!("[{}/{}] Scanning #{}", index, total, name));
                });
            }
            ProgressEvent::BatchScanned {
                channel,
                fetched,
                messages,
                mentions,
                milestone,
            } => {
                self.store.update(&self.job_id, |job| {
                    job.total_messages += messages;
                    job.total_mentions += mentions;
                    if milestone {
                        job.logs.push(format!("  #{}: {} messages fetched", channel, fetched));
                    }
                });
            }
            ProgressEvent::ChannelFinished {
                name,
                messages,
                mentions,
                filtered,
            } => {
                let scope = if filtered { " in period" } else { "" };
                self.log(format!(
                    "  #{} done: {} messages{}, {} mentions",
                    name, messages, scope, mentions
                ));
            }
            ProgressEvent::ChannelFailed { name, error } => {
                self.log(format!("  #{} skipped: {}", name, error));
            }
            ProgressEvent::ScanFinished { total_messages } => {
                self.log(format!("All channels scanned: {} messages", total_messages));
            }
            ProgressEvent::EnrichmentStarted { members } => {
                self.store.update(&self.job_id, |job| {
                    job.total_users = members;
                    job.logs
                        .push(format!("Resolving {} mentioned members...", members));
                });
            }
            ProgressEvent::MemberProcessed { processed } => {
                self.store.update(&self.job_id, |job| {
                    job.processed_users = job.processed_users.max(processed);
                });
            }
            ProgressEvent::EnrichmentFinished { resolved } => {
                self.log(format!("Members resolved: {}", resolved));
            }
            ProgressEvent::Summary { report } => {
                self.log("=== Ranking ===");
                if report.rankings.is_empty() {
                    self.log("No mentions found");
                }
                for line in report.summary_lines(SUMMARY_TOP_N) {
                    self.log(line);
                }
            }
        }
    }
}
