//! Mention ranking pipeline.
//!
//! A run walks every text channel of a guild backwards through its history,
//! tallies how often each human member is mentioned, resolves the tallied
//! members to display metadata and sorts them into a [`Report`].
//!
//! - [`paginator`] drives one channel under a message budget and date cutoff
//! - [`tally`] is the member -> count table the paginator writes into
//! - [`members`] resolves member ids through a cached directory
//! - [`report`] orders the enriched entries
//! - [`pipeline`] ties the phases together for one job

pub mod members;
pub mod paginator;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod tally;

pub use members::MemberDirectory;
pub use pipeline::{PipelineError, PipelineSettings, RankingPipeline, RankingRequest};
pub use progress::{ProgressEvent, ProgressReporter};
pub use report::{RankingEntry, Report};
pub use tally::MentionTally;

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Calendar date format accepted by the rankings endpoint
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive time window a run is restricted to. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateRangeError {
    #[error("invalid {field} \"{value}\", expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("startDate {start} is after endDate {end}")]
    StartAfterEnd { start: String, end: String },
}

/// Convert a local wall-clock time to UTC. Ambiguous times take the earlier
/// instant; times skipped by a DST jump are read as UTC.
fn local_instant(naive: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => naive.and_utc(),
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| DateRangeError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build a range from calendar dates: the start date from 00:00:00 local
    /// time, the end date through 23:59:59.999 local time.
    pub fn from_calendar_dates(
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Self, DateRangeError> {
        let start_day = start_date.map(|s| parse_date("startDate", s)).transpose()?;
        let end_day = end_date.map(|s| parse_date("endDate", s)).transpose()?;

        if let (Some(start), Some(end)) = (start_day, end_day) {
            if start > end {
                return Err(DateRangeError::StartAfterEnd {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }

        Ok(Self {
            start: start_day
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(local_instant),
            end: end_day
                .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
                .map(local_instant),
        })
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Strictly older than the start bound.
    pub fn is_before_start(&self, at: DateTime<Utc>) -> bool {
        self.start.is_some_and(|start| at < start)
    }

    /// Strictly newer than the end bound.
    pub fn is_after_end(&self, at: DateTime<Utc>) -> bool {
        self.end.is_some_and(|end| at > end)
    }

    /// Human-readable "start ~ end" in local dates, `None` when unbounded.
    pub fn describe(&self) -> Option<String> {
        if !self.is_bounded() {
            return None;
        }
        let side = |bound: Option<DateTime<Utc>>| {
            bound
                .map(|t| t.with_timezone(&Local).format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        };
        Some(format!("{} ~ {}", side(self.start), side(self.end)))
    }
}
