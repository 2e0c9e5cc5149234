use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::JobsConfig;

use super::{Job, JobError, JobHandle};

struct JobEntry {
    job: Job,
    guild_id: String,
    cancel: CancellationToken,
}

struct Inner {
    jobs: RwLock<HashMap<String, JobEntry>>,
    max_running: usize,
    retention: Duration,
    closed: AtomicBool,
}

/// Process-wide registry of ranking jobs.
///
/// Admits at most one running job per guild and `max_running` running jobs in
/// total. Cheap to clone; all clones share the same map.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Inner>,
}

impl JobStore {
    pub fn new(max_running: usize, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                max_running: max_running.max(1),
                retention,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(
            config.max_running,
            Duration::from_secs(config.retention_seconds),
        )
    }

    /// How long terminal jobs stay readable.
    pub fn retention(&self) -> Duration {
        self.inner.retention
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.inner.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.inner.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job for a guild under a generated id.
    pub fn open(&self, guild_id: &str, server_name: &str) -> Result<JobHandle, JobError> {
        let mut jobs = self.write();

        let base = format!("progress_{}_{}", guild_id, Utc::now().timestamp_millis());
        let mut job_id = base.clone();
        let mut suffix = 1u32;
        while jobs.contains_key(&job_id) {
            job_id = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        self.admit(&mut jobs, job_id, guild_id, server_name)
    }

    /// Register a new job under an explicit id.
    pub fn create(
        &self,
        job_id: &str,
        guild_id: &str,
        server_name: &str,
    ) -> Result<JobHandle, JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(job_id) {
            return Err(JobError::AlreadyExists(job_id.to_string()));
        }
        self.admit(&mut jobs, job_id.to_string(), guild_id, server_name)
    }

    fn admit(
        &self,
        jobs: &mut HashMap<String, JobEntry>,
        job_id: String,
        guild_id: &str,
        server_name: &str,
    ) -> Result<JobHandle, JobError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(JobError::ShuttingDown);
        }

        let mut running = 0;
        for (id, entry) in jobs.iter() {
            if entry.job.status.is_terminal() {
                continue;
            }
            if entry.guild_id == guild_id {
                return Err(JobError::GuildBusy { job_id: id.clone() });
            }
            running += 1;
        }
        if running >= self.inner.max_running {
            return Err(JobError::AtCapacity {
                limit: self.inner.max_running,
            });
        }

        let cancel = CancellationToken::new();
        jobs.insert(
            job_id.clone(),
            JobEntry {
                job: Job::new(job_id.clone(), server_name),
                guild_id: guild_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        tracing::debug!(%job_id, %guild_id, "Job admitted");

        Ok(JobHandle::new(job_id, self.clone(), cancel))
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.read().get(job_id).map(|entry| entry.job.clone())
    }

    /// Writer for an existing job.
    pub fn handle(&self, job_id: &str) -> Option<JobHandle> {
        self.read()
            .get(job_id)
            .map(|entry| JobHandle::new(job_id.to_string(), self.clone(), entry.cancel.clone()))
    }

    /// Apply `f` to a running job. Terminal and missing jobs are left alone.
    pub(super) fn update<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        match self.write().get_mut(job_id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                f(&mut entry.job);
                true
            }
            _ => false,
        }
    }

    /// Ask a running job to stop. It turns into an error at its next suspension point.
    pub fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let jobs = self.read();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if entry.job.status.is_terminal() {
            return Err(JobError::AlreadyFinished(job_id.to_string()));
        }
        entry.cancel.cancel();
        tracing::info!(%job_id, "Job cancellation requested");
        Ok(())
    }

    /// Remove a job once `delay` has passed, whether or not anyone read it.
    pub fn schedule_eviction(&self, job_id: &str, delay: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.write().remove(&job_id).is_some() {
                tracing::debug!(%job_id, "Evicted job");
            }
        })
    }

    /// Number of jobs still processing.
    pub fn running(&self) -> usize {
        self.read()
            .values()
            .filter(|entry| !entry.job.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Refuse new jobs and cancel every running one. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let jobs = self.read();
        let mut cancelled = 0;
        for entry in jobs.values().filter(|e| !e.job.status.is_terminal()) {
            entry.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::ranking::Report;

    fn store() -> JobStore {
        JobStore::new(4, Duration::from_secs(300))
    }

    fn empty_report() -> Report {
        Report::build("Guild", 0, Vec::new())
    }

    #[test]
    fn test_create_and_get() {
        let jobs = store();
        let handle = jobs.create("job-1", "g1", "Guild").unwrap();

        assert_eq!(handle.id(), "job-1");
        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.server_name, "Guild");
        assert!(jobs.get("job-2").is_none());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let jobs = store();
        jobs.create("job-1", "g1", "Guild").unwrap();
        assert_eq!(
            jobs.create("job-1", "g2", "Other").unwrap_err(),
            JobError::AlreadyExists("job-1".to_string())
        );
    }

    #[test]
    fn test_generated_ids_are_unique_per_guild_and_time() {
        let jobs = JobStore::new(10, Duration::from_secs(300));
        let first = jobs.open("g1", "Guild").unwrap();
        first.complete(empty_report());
        let second = jobs.open("g1", "Guild").unwrap();

        assert!(first.id().starts_with("progress_g1_"));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_one_running_job_per_guild() {
        let jobs = store();
        let running = jobs.open("g1", "Guild").unwrap();

        match jobs.open("g1", "Guild") {
            Err(JobError::GuildBusy { job_id }) => assert_eq!(job_id, running.id()),
            other => panic!("expected GuildBusy, got {:?}", other.map(|h| h.id().to_string())),
        }
        assert!(jobs.open("g2", "Other").is_ok());

        running.fail("boom");
        assert!(jobs.open("g1", "Guild").is_ok());
    }

    #[test]
    fn test_global_running_cap() {
        let jobs = JobStore::new(2, Duration::from_secs(300));
        jobs.open("g1", "One").unwrap();
        jobs.open("g2", "Two").unwrap();

        assert_eq!(
            jobs.open("g3", "Three").unwrap_err(),
            JobError::AtCapacity { limit: 2 }
        );
        assert_eq!(jobs.running(), 2);
    }

    #[test]
    fn test_writes_after_terminal_are_ignored() {
        let jobs = store();
        let handle = jobs.create("job-1", "g1", "Guild").unwrap();
        handle.complete(empty_report());
        handle.fail("late failure");
        handle.log("late line");

        let job = jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert!(job.result.is_some());
        assert!(!job.logs.iter().any(|l| l.message == "late line"));
    }

    #[test]
    fn test_cancel() {
        let jobs = store();
        let handle = jobs.create("job-1", "g1", "Guild").unwrap();

        jobs.cancel("job-1").unwrap();
        assert!(handle.cancellation_token().is_cancelled());

        assert_eq!(
            jobs.cancel("nope").unwrap_err(),
            JobError::NotFound("nope".to_string())
        );

        handle.fail("cancelled");
        assert_eq!(
            jobs.cancel("job-1").unwrap_err(),
            JobError::AlreadyFinished("job-1".to_string())
        );
    }

    #[test]
    fn test_handle_shares_cancellation() {
        let jobs = store();
        let original = jobs.create("job-1", "g1", "Guild").unwrap();
        let looked_up = jobs.handle("job-1").unwrap();

        looked_up.cancellation_token().cancel();
        assert!(original.cancellation_token().is_cancelled());
        assert!(jobs.handle("nope").is_none());
    }

    #[test]
    fn test_shutdown_cancels_running_and_refuses_new() {
        let jobs = store();
        let running = jobs.open("g1", "One").unwrap();
        let finished = jobs.open("g2", "Two").unwrap();
        finished.complete(empty_report());

        assert_eq!(jobs.shutdown(), 1);
        assert!(running.cancellation_token().is_cancelled());
        assert!(!finished.cancellation_token().is_cancelled());
        assert_eq!(jobs.open("g3", "Three").unwrap_err(), JobError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_job_is_evicted_after_retention() {
        let jobs = store();
        let handle = jobs.create("job-1", "g1", "Guild").unwrap();
        handle.complete(empty_report());
        jobs.schedule_eviction("job-1", jobs.retention());

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert!(jobs.get("job-1").is_some());

        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(jobs.get("job-1").is_none());
        assert!(jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_evicted_too() {
        let jobs = store();
        let handle = jobs.create("job-1", "g1", "Guild").unwrap();
        handle.fail("boom");
        jobs.schedule_eviction("job-1", jobs.retention())
            .await
            .unwrap();

        assert!(jobs.get("job-1").is_none());
    }
}
