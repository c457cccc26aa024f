//! Durable job store contract and an in-process implementation.

use crate::core::error::{AppError, Result};
use crate::core::models::{Job, JobId, JobStatus, JobSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Terminal write applied by [`JobStore::set_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub summary: Option<JobSummary>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn completed(summary: JobSummary) -> Self {
        Self {
            status: JobStatus::Completed,
            summary: Some(summary),
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn cancelled(summary: JobSummary) -> Self {
        Self {
            status: JobStatus::Cancelled,
            summary: Some(summary),
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Failed,
            summary: None,
            error_message: Some(message.into()),
            completed_at,
        }
    }
}

/// Persistent record of every job. Callers must not assume it lives in this
/// process; each call stands alone.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    async fn create(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Record row progress. Counters never move backwards and never exceed
    /// `total_rows`. Ignored once the job has left `running`.
    async fn update_progress(
        &self,
        id: JobId,
        completed_rows: usize,
        processing_row: usize,
    ) -> Result<()>;

    /// Ignored once the job has left `running`, so a stalled job never looks
    /// alive again.
    async fn update_heartbeat(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    /// Flag a running job for cancellation. Returns `false` if the job had
    /// already reached a terminal state.
    async fn request_cancel(&self, id: JobId) -> Result<bool>;

    /// Flip a job from `running` to a terminal status.
    ///
    /// The check and the write happen atomically. Returns `false`, leaving the
    /// record untouched, when the job is no longer running.
    async fn set_status(&self, id: JobId, update: StatusUpdate) -> Result<bool>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    async fn count_running(&self) -> Result<usize>;

    /// Remove a job. Returns whether it existed.
    async fn delete(&self, id: JobId) -> Result<bool>;
}

/// [`JobStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(&self, id: JobId, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(AppError::Store(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn update_progress(
        &self,
        id: JobId,
        completed_rows: usize,
        processing_row: usize,
    ) -> Result<()> {
        self.with_job(id, |job| {
            if job.status != JobStatus::Running {
                return;
            }
            job.completed_rows = job.completed_rows.max(completed_rows.min(job.total_rows));
            job.processing_row = job.processing_row.max(processing_row.min(job.total_rows));
        })
    }

    async fn update_heartbeat(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        self.with_job(id, |job| {
            if job.status == JobStatus::Running {
                job.last_heartbeat = Some(at);
            }
        })
    }

    async fn request_cancel(&self, id: JobId) -> Result<bool> {
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                false
            } else {
                job.cancel_requested = true;
                true
            }
        })
    }

    async fn set_status(&self, id: JobId, update: StatusUpdate) -> Result<bool> {
        if !update.status.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: JobStatus::Running.to_string(),
                to: update.status.to_string(),
            });
        }
        self.with_job(id, |job| {
            if job.status != JobStatus::Running {
                return false;
            }
            job.status = update.status;
            job.completed_at = Some(update.completed_at);
            if update.summary.is_some() {
                job.summary = update.summary;
            }
            if update.error_message.is_some() {
                job.error_message = update.error_message;
            }
            true
        })
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn count_running(&self) -> Result<usize> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .count())
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        Ok(self.jobs.lock().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminal_status_is_write_once() {
        let store = InMemoryJobStore::new();
        let job = Job::new(3, None);
        store.create(&job).await.unwrap();

        let done = store
            .set_status(job.id, StatusUpdate::completed(JobSummary::default()))
            .await
            .unwrap();
        assert!(done);

        let overwritten = store
            .set_status(job.id, StatusUpdate::failed("stalled", Utc::now()))
            .await
            .unwrap();
        assert!(!overwritten);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_running_is_not_a_valid_target() {
        let store = InMemoryJobStore::new();
        let job = Job::new(1, None);
        store.create(&job).await.unwrap();
        let update = StatusUpdate {
            status: JobStatus::Running,
            summary: None,
            error_message: None,
            completed_at: Utc::now(),
        };
        assert!(matches!(
            store.set_status(job.id, update).await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let store = InMemoryJobStore::new();
        let job = Job::new(5, None);
        store.create(&job).await.unwrap();

        store.update_progress(job.id, 3, 3).await.unwrap();
        store.update_progress(job.id, 2, 2).await.unwrap();
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.completed_rows, 3);

        store.update_progress(job.id, 9, 9).await.unwrap();
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.completed_rows, 5);
        assert_eq!(stored.processing_row, 5);
    }

    #[tokio::test]
    async fn test_terminal_job_ignores_progress_and_heartbeat() {
        let store = InMemoryJobStore::new();
        let job = Job::new(4, None);
        store.create(&job).await.unwrap();
        store.update_progress(job.id, 1, 2).await.unwrap();
        store
            .set_status(job.id, StatusUpdate::failed("stalled", Utc::now()))
            .await
            .unwrap();

        store.update_progress(job.id, 3, 4).await.unwrap();
        store.update_heartbeat(job.id, Utc::now()).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.completed_rows, 1);
        assert_eq!(stored.processing_row, 2);
        assert!(stored.last_heartbeat.is_none());
    }

    #[tokio::test]
    async fn test_cancel_and_delete() {
        let store = InMemoryJobStore::new();
        let job = Job::new(2, Some("batch".into()));
        store.create(&job).await.unwrap();
        assert_eq!(store.count_running().await.unwrap(), 1);

        assert!(store.request_cancel(job.id).await.unwrap());
        assert!(store.get(job.id).await.unwrap().unwrap().cancel_requested);

        store
            .set_status(job.id, StatusUpdate::cancelled(JobSummary::default()))
            .await
            .unwrap();
        assert!(!store.request_cancel(job.id).await.unwrap());
        assert_eq!(store.count_running().await.unwrap(), 0);
        assert_eq!(
            store.list_by_status(JobStatus::Cancelled).await.unwrap().len(),
            1
        );

        assert!(store.delete(job.id).await.unwrap());
        assert!(!store.delete(job.id).await.unwrap());
        assert!(matches!(
            store.update_heartbeat(job.id, Utc::now()).await,
            Err(AppError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = Job::new(1, None);
        store.create(&job).await.unwrap();
        assert!(matches!(store.create(&job).await, Err(AppError::Store(_))));
    }
}
