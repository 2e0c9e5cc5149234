//! Ranking job tracking.
//!
//! Every ranking request becomes a [`Job`] in the [`JobStore`]. The pipeline
//! task owns a [`JobHandle`] it writes progress through; HTTP handlers read
//! snapshots. Terminal jobs are evicted after the retention delay.

mod handle;
mod runner;
mod store;

pub use handle::JobHandle;
pub use runner::spawn_ranking_job;
pub use store::JobStore;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;

use crate::config::JOB_LOG_CAPACITY;
use crate::ranking::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Local wall-clock `HH:MM:SS`
    pub time: String,
    pub message: String,
}

/// Ring of the most recent log lines of a job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == JOB_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            time: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Snapshot of one ranking run as served by the progress endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(skip)]
    pub job_id: String,
    pub status: JobStatus,
    pub server_name: String,
    pub total_channels: usize,
    pub processed_channels: usize,
    pub current_channel: String,
    pub total_messages: u64,
    pub total_mentions: u64,
    pub total_users: usize,
    pub processed_users: usize,
    pub logs: LogBuffer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub result: Option<Arc<Report>>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Processing,
            server_name: server_name.into(),
            total_channels: 0,
            processed_channels: 0,
            current_channel: String::new(),
            total_messages: 0,
            total_mentions: 0,
            total_users: 0,
            processed_users: 0,
            logs: LogBuffer::default(),
            error: None,
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already finished: {0}")]
    AlreadyFinished(String),

    #[error("A ranking is already running for this server (job {job_id})")]
    GuildBusy { job_id: String },

    #[error("Too many rankings running (limit {limit}), try again later")]
    AtCapacity { limit: usize },

    #[error("Server is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_keeps_latest_entries() {
        let mut logs = LogBuffer::default();
        for i in 0..(JOB_LOG_CAPACITY + 25) {
            logs.push(format!("line {}", i));
        }

        assert_eq!(logs.len(), JOB_LOG_CAPACITY);
        assert_eq!(logs.iter().next().unwrap().message, "line 25");
        assert_eq!(
            logs.iter().last().unwrap().message,
            format!("line {}", JOB_LOG_CAPACITY + 24)
        );
    }

    #[test]
    fn test_log_time_format() {
        let mut logs = LogBuffer::default();
        logs.push("hello");
        let time = &logs.iter().next().unwrap().time;
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);
    }

    #[test]
    fn test_job_serializes_progress_fields_only() {
        let mut job = Job::new("progress_1_2", "Guild");
        job.logs.push("started");
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["status"], "processing");
        assert_eq!(json["serverName"], "Guild");
        assert_eq!(json["processedChannels"], 0);
        assert_eq!(json["logs"][0]["message"], "started");
        assert!(json.get("jobId").is_none());
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }
}
