//! Drives batches of addresses through the verifier, one row at a time.

use super::sink::{ResultRecord, ResultSink};
use super::store::{JobStore, StatusUpdate};
use crate::core::config::Config;
use crate::core::error::{AppError, Result};
use crate::core::models::{
    BatchRow, Job, JobId, ReasonCode, SummaryAccumulator, VerificationOutcome,
};
use crate::core::verifier::EmailVerifier;
use crate::utils::address::clean_address_field;

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Attempts at the terminal status write before the job is given up on.
const STATUS_WRITE_ATTEMPTS: u32 = 3;
const STATUS_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// A job accepted by [`JobRunner::submit`], running on its own task.
pub struct SubmittedJob {
    pub id: JobId,
    pub handle: JoinHandle<Result<Job>>,
}

/// Runs jobs against a shared verifier, job store and result sink.
#[derive(Clone)]
pub struct JobRunner {
    verifier: Arc<EmailVerifier>,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ResultSink>,
    config: Arc<Config>,
}

impl JobRunner {
    pub fn new(
        verifier: Arc<EmailVerifier>,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ResultSink>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            verifier,
            store,
            sink,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Admits a new job and starts processing it on a spawned task.
    ///
    /// Admission compares the number of running jobs with the configured cap
    /// before the job record is created; it is not a reservation.
    pub async fn submit(&self, rows: Vec<BatchRow>, name: Option<String>) -> Result<SubmittedJob> {
        let running = self.store.count_running().await?;
        if running >= self.config.max_concurrent_jobs {
            tracing::warn!(target: "job_runner",
                "Rejecting job: {} running, max {}", running, self.config.max_concurrent_jobs);
            return Err(AppError::TooManyConcurrentJobs {
                running,
                max_allowed: self.config.max_concurrent_jobs,
            });
        }

        let job = Job::new(rows.len(), name);
        self.store.create(&job).await?;
        tracing::info!(target: "job_runner", job_id = %job.id, total_rows = job.total_rows, "Job submitted");

        let runner = self.clone();
        let id = job.id;
        let handle = tokio::spawn(async move { runner.run(id, rows).await });
        Ok(SubmittedJob { id, handle })
    }

    /// Requests cooperative cancellation. The runner stops at the next row
    /// boundary.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
        if !self.store.request_cancel(id).await? {
            return Err(AppError::InvalidTransition {
                from: job.status.to_string(),
                to: "cancelled".to_string(),
            });
        }
        tracing::info!(target: "job_runner", job_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Processes `rows` for an existing running job and returns its final record.
    pub async fn run(&self, id: JobId, rows: Vec<BatchRow>) -> Result<Job> {
        let started = Instant::now();
        let total = rows.len();
        let heartbeat_every = self.config.heartbeat_interval_rows.max(1);
        let mut summary = SummaryAccumulator::default();

        tracing::info!(target: "job_runner", job_id = %id, total_rows = total, "Starting job");

        for (index, row) in rows.into_iter().enumerate() {
            let row_number = index + 1;

            match self.store.get(id).await {
                Ok(Some(job)) if job.status.is_terminal() => {
                    tracing::warn!(target: "job_runner", job_id = %id, status = %job.status,
                        "Job left running state externally at row {}; stopping", row_number);
                    return Ok(job);
                }
                Ok(Some(job)) if job.cancel_requested => {
                    tracing::info!(target: "job_runner", job_id = %id, row = row_number, "Job cancelled");
                    return self
                        .finish(id, StatusUpdate::cancelled(summary.summary()))
                        .await;
                }
                Ok(Some(_)) => {}
                Ok(None) => return Err(AppError::JobNotFound(id.to_string())),
                Err(e) => {
                    tracing::warn!(target: "job_runner", job_id = %id,
                        "Could not read job state before row {}: {}", row_number, e);
                }
            }

            if let Err(e) = self.store.update_progress(id, index, row_number).await {
                tracing::warn!(target: "job_runner", job_id = %id, "Progress update failed: {}", e);
            }

            let email = clean_address_field(&row.raw_email).unwrap_or_default();
            let outcome = self.verify_isolated(id, row_number, &email).await;
            summary.record(&outcome);

            let record = ResultRecord {
                job_id: id,
                row_index: index,
                email,
                original_fields: row.fields,
                outcome,
            };
            if let Err(e) = self.sink.append(record).await {
                tracing::error!(target: "job_runner", job_id = %id, row = row_number,
                    "Failed to append result: {}", e);
            }

            if let Err(e) = self.store.update_progress(id, row_number, row_number).await {
                tracing::warn!(target: "job_runner", job_id = %id, "Progress update failed: {}", e);
            }

            if row_number % heartbeat_every == 0 {
                if let Err(e) = self.store.update_heartbeat(id, Utc::now()).await {
                    tracing::warn!(target: "job_runner", job_id = %id,
                        "Heartbeat write failed, will retry at next interval: {}", e);
                }
            }
        }

        let final_summary = summary.summary();
        tracing::info!(target: "job_runner",
            job_id = %id,
            valid = final_summary.valid,
            risky = final_summary.risky,
            invalid = final_summary.invalid,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );
        self.finish(id, StatusUpdate::completed(final_summary)).await
    }

    /// Verifies one row. A panic inside verification becomes an unclassified
    /// outcome for that row only.
    async fn verify_isolated(&self, id: JobId, row: usize, email: &str) -> VerificationOutcome {
        match AssertUnwindSafe(self.verifier.verify(email))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(target: "job_runner", job_id = %id, row = row,
                    "Verification of <{}> failed unexpectedly", email);
                let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
                self.verifier
                    .scoring()
                    .outcome(ReasonCode::Unclassified, domain)
            }
        }
    }

    /// Writes the terminal status, retrying transient store errors with a
    /// doubling backoff so a finished batch is not lost to one failed write.
    async fn finish(&self, id: JobId, update: StatusUpdate) -> Result<Job> {
        let status = update.status;
        let mut backoff = STATUS_WRITE_BACKOFF;
        let mut attempt = 1;
        let applied = loop {
            match self.store.set_status(id, update.clone()).await {
                Ok(applied) => break applied,
                Err(e) if attempt < STATUS_WRITE_ATTEMPTS => {
                    tracing::warn!(target: "job_runner", job_id = %id,
                        "Writing status {} failed (attempt {}/{}), retrying in {:?}: {}",
                        status, attempt, STATUS_WRITE_ATTEMPTS, backoff, e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(target: "job_runner", job_id = %id,
                        "Giving up on writing status {} after {} attempts: {}",
                        status, STATUS_WRITE_ATTEMPTS, e);
                    return Err(e);
                }
            }
        };
        if !applied {
            tracing::warn!(target: "job_runner", job_id = %id,
                "Job was no longer running; {} not recorded", status);
        }
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }
}
