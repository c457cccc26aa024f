//! Background detection of jobs whose heartbeat has gone silent.

use super::store::{JobStore, StatusUpdate};
use crate::core::config::Config;
use crate::core::models::{JobId, JobStatus};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

struct MonitorState {
    store: Arc<dyn JobStore>,
    stall_timeout: Duration,
    cooldown: Duration,
    last_flagged: Mutex<HashMap<JobId, DateTime<Utc>>>,
}

struct MonitorTask {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodically marks running jobs as failed when they stop heartbeating.
///
/// Runs independently of any job runner, reading only the job store. Store
/// errors end the current cycle quietly; the next tick tries again.
pub struct StallMonitor {
    state: Arc<MonitorState>,
    interval: Duration,
    shutdown_timeout: Duration,
    running: Mutex<Option<MonitorTask>>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

impl MonitorState {
    async fn check_at(&self, now: DateTime<Utc>) -> usize {
        let running = match self.store.list_by_status(JobStatus::Running).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(target: "stall_monitor", "Error checking stalled jobs: {}", e);
                return 0;
            }
        };

        let stall_timeout = to_chrono(self.stall_timeout);
        let cooldown = to_chrono(self.cooldown);
        let stall_minutes = self.stall_timeout.as_secs() / 60;

        self.last_flagged
            .lock()
            .retain(|_, flagged_at| now - *flagged_at < cooldown);

        let mut marked = 0;
        for job in running {
            if now - job.liveness_timestamp() <= stall_timeout {
                continue;
            }
            if self.last_flagged.lock().contains_key(&job.id) {
                continue;
            }

            let message = format!("Job stalled (no activity for {} minutes)", stall_minutes);
            match self
                .store
                .set_status(job.id, StatusUpdate::failed(message, now))
                .await
            {
                Ok(true) => {
                    tracing::warn!(target: "stall_monitor", job_id = %job.id,
                        completed_rows = job.completed_rows,
                        total_rows = job.total_rows,
                        "Marked job as stalled");
                    self.last_flagged.lock().insert(job.id, now);
                    marked += 1;
                }
                Ok(false) => {
                    tracing::debug!(target: "stall_monitor", job_id = %job.id,
                        "Job finished before it could be marked stalled");
                }
                Err(e) => {
                    tracing::error!(target: "stall_monitor", job_id = %job.id,
                        "Failed to mark job as stalled: {}", e);
                }
            }
        }
        marked
    }
}

impl StallMonitor {
    pub fn new(store: Arc<dyn JobStore>, config: &Config) -> Self {
        Self {
            state: Arc::new(MonitorState {
                store,
                stall_timeout: config.stall_timeout,
                cooldown: config.stall_cooldown,
                last_flagged: Mutex::new(HashMap::new()),
            }),
            interval: config.monitor_interval,
            shutdown_timeout: config.monitor_shutdown_timeout,
            running: Mutex::new(None),
        }
    }

    /// Runs one detection pass against the current time.
    /// Returns the number of jobs marked as failed.
    pub async fn check_stalled_jobs_once(&self) -> usize {
        self.state.check_at(Utc::now()).await
    }

    /// Runs one detection pass as if the current time were `now`.
    pub async fn check_stalled_jobs_once_at(&self, now: DateTime<Utc>) -> usize {
        self.state.check_at(now).await
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|t| !t.task.is_finished())
            .unwrap_or(false)
    }

    /// Spawns the periodic loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().map(|t| !t.task.is_finished()).unwrap_or(false) {
            tracing::warn!(target: "stall_monitor", "Stall monitor already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(self.state.clone(), self.interval, stop_rx));
        *running = Some(MonitorTask { stop_tx, task });
        tracing::info!(target: "stall_monitor", interval = ?self.interval, "Stall monitor started");
    }

    /// Signals the loop to stop and waits up to the configured shutdown
    /// timeout. A loop that does not exit in time is aborted.
    pub async fn stop(&self) {
        let taken = self.running.lock().take();
        let Some(MonitorTask { stop_tx, mut task }) = taken else {
            return;
        };
        let _ = stop_tx.send(true);

        match time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(_) => tracing::debug!(target: "stall_monitor", "Stall monitor stopped"),
            Err(_) => {
                tracing::warn!(target: "stall_monitor",
                    "Stall monitor did not stop within {:?}; aborting", self.shutdown_timeout);
                task.abort();
            }
        }
    }
}

async fn monitor_loop(
    state: Arc<MonitorState>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let marked = state.check_at(Utc::now()).await;
        if marked > 0 {
            tracing::info!(target: "stall_monitor", "Marked {} stalled job(s) as failed", marked);
        }
    }
}
