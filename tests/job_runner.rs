use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lead_validator_core::{
    AppError, BatchRow, Config, EmailVerifier, InMemoryJobStore, InMemoryResultSink, Job, JobId,
    JobRunner, JobStatus, JobStore, MxLookupOutcome, MxResolver, ProbeResult, RcptProbe,
    ReasonCode, Result, StatusUpdate, ValidatorMode, VerificationStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct StaticMx;

#[async_trait]
impl MxResolver for StaticMx {
    async fn lookup_mx(&self, domain: &str) -> MxLookupOutcome {
        match domain {
            "nomail.io" => MxLookupOutcome::NoRecords,
            _ => MxLookupOutcome::Hosts(vec![format!("mx.{}", domain)]),
        }
    }
}

/// Answers from a per-mailbox script. Catch-all probes are rejected unless the
/// domain is listed as accepting everything.
#[derive(Default)]
struct ScriptedSmtp {
    replies: HashMap<String, u16>,
    accept_all_domains: Vec<String>,
    panic_on: Option<String>,
}

#[async_trait]
impl RcptProbe for ScriptedSmtp {
    async fn rcpt(&self, recipient: &str, _mx: &str, _timeout: Duration) -> ProbeResult {
        let domain = recipient.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
        if recipient.starts_with("no-reply-does-not-exist-") {
            return if self.accept_all_domains.iter().any(|d| d == domain) {
                ProbeResult::responded(250, "OK")
            } else {
                ProbeResult::responded(550, "No such user")
            };
        }
        if self.panic_on.as_deref() == Some(recipient) {
            panic!("scripted transport failure for {}", recipient);
        }
        match self.replies.get(recipient) {
            Some(code) => ProbeResult::responded(*code, "scripted"),
            None => ProbeResult::timeout(),
        }
    }
}

/// Holds every real recipient probe until the test hands out a permit.
struct GatedSmtp {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl RcptProbe for GatedSmtp {
    async fn rcpt(&self, recipient: &str, _mx: &str, _timeout: Duration) -> ProbeResult {
        if recipient.starts_with("no-reply-does-not-exist-") {
            return ProbeResult::responded(550, "No such user");
        }
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return ProbeResult::timeout(),
        }
        ProbeResult::responded(250, "OK")
    }
}

/// Wraps the in-memory store and fails every heartbeat, every other progress
/// write and the first `status_failures` terminal writes.
struct FlakyStore {
    inner: InMemoryJobStore,
    progress_calls: AtomicUsize,
    heartbeat_failures: AtomicUsize,
    status_failures_left: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(status_failures: usize) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            progress_calls: AtomicUsize::new(0),
            heartbeat_failures: AtomicUsize::new(0),
            status_failures_left: AtomicUsize::new(status_failures),
            status_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create(&self, job: &Job) -> Result<()> {
        self.inner.create(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.get(id).await
    }

    async fn update_progress(&self, id: JobId, completed: usize, processing: usize) -> Result<()> {
        if self.progress_calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(AppError::Store("connection lost".into()));
        }
        self.inner.update_progress(id, completed, processing).await
    }

    async fn update_heartbeat(&self, _id: JobId, _at: DateTime<Utc>) -> Result<()> {
        self.heartbeat_failures.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Store("connection lost".into()))
    }

    async fn request_cancel(&self, id: JobId) -> Result<bool> {
        self.inner.request_cancel(id).await
    }

    async fn set_status(&self, id: JobId, update: StatusUpdate) -> Result<bool> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .status_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Store("write timed out".into()));
        }
        self.inner.set_status(id, update).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.inner.list_by_status(status).await
    }

    async fn count_running(&self) -> Result<usize> {
        self.inner.count_running().await
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        self.inner.delete(id).await
    }
}

fn real_config() -> Config {
    Config {
        validator_mode: ValidatorMode::Real,
        smtp_retries: 0,
        heartbeat_interval_rows: 1,
        ..Config::default()
    }
}

fn runner_with(
    config: Config,
    transport: Arc<dyn RcptProbe>,
    store: Arc<dyn JobStore>,
) -> (JobRunner, Arc<InMemoryResultSink>) {
    let config = Arc::new(config);
    let verifier = Arc::new(EmailVerifier::new(config.clone(), Arc::new(StaticMx), transport));
    let sink = Arc::new(InMemoryResultSink::new());
    (JobRunner::new(verifier, store, sink.clone(), config), sink)
}

fn rows(emails: &[&str]) -> Vec<BatchRow> {
    emails.iter().map(|e| BatchRow::from_email(*e)).collect()
}

async fn wait_for<F>(store: &dyn JobStore, id: JobId, mut done: F) -> Job
where
    F: FnMut(&Job) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(job)) = store.get(id).await {
                if done(&job) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected state in time")
}

#[tokio::test]
async fn test_batch_results_follow_smtp_replies() {
    let transport = ScriptedSmtp {
        replies: HashMap::from([
            ("jane@acme.io".to_string(), 250),
            ("ghost@acme.io".to_string(), 550),
            ("busy@acme.io".to_string(), 451),
        ]),
        accept_all_domains: vec!["catchall.io".to_string()],
        panic_on: None,
    };
    let store = Arc::new(InMemoryJobStore::new());
    let (runner, sink) = runner_with(real_config(), Arc::new(transport), store.clone());

    let submitted = runner
        .submit(
            rows(&[
                "Jane Doe <jane@acme.io>",
                "ghost@acme.io",
                "busy@acme.io",
                "anyone@catchall.io",
                "someone@nomail.io",
                "not-an-address",
            ]),
            Some("scripted".into()),
        )
        .await
        .unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_rows, 6);

    let reasons: Vec<String> = sink
        .records(job.id)
        .iter()
        .map(|r| r.outcome.reason.to_string())
        .collect();
    assert_eq!(
        reasons,
        vec![
            "smtp_ok",
            "smtp_reject_550",
            "temp_fail_451",
            "domain_accepts_all",
            "no_mx",
            "empty_email",
        ]
    );

    let summary = job.summary.unwrap();
    assert_eq!(summary.valid, 1);
    assert_eq!(summary.risky, 2);
    assert_eq!(summary.invalid, 3);
    assert_eq!(summary.total, 6);
}

#[tokio::test]
async fn test_progress_never_moves_backwards() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryJobStore::new());
    let (runner, sink) = runner_with(
        real_config(),
        Arc::new(GatedSmtp { gate: gate.clone() }),
        store.clone(),
    );

    let emails = ["a@acme.io", "b@acme.io", "c@acme.io", "d@acme.io"];
    let submitted = runner.submit(rows(&emails), None).await.unwrap();

    let mut last_completed = 0;
    for expected in 1..=emails.len() {
        gate.add_permits(1);
        let job = wait_for(store.as_ref(), submitted.id, |job| {
            job.completed_rows >= expected
        })
        .await;
        assert!(job.completed_rows >= last_completed);
        assert!(job.completed_rows <= job.total_rows);
        assert!(job.processing_row <= job.total_rows);
        last_completed = job.completed_rows;
    }

    let job = submitted.handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_rows, emails.len());
    assert!(job.last_heartbeat.is_some());
    assert_eq!(sink.len(), emails.len());
}

#[tokio::test]
async fn test_cancel_stops_at_row_boundary() {
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryJobStore::new());
    let (runner, sink) = runner_with(
        real_config(),
        Arc::new(GatedSmtp { gate: gate.clone() }),
        store.clone(),
    );

    let submitted = runner
        .submit(
            rows(&["a@acme.io", "b@acme.io", "c@acme.io", "d@acme.io", "e@acme.io"]),
            None,
        )
        .await
        .unwrap();

    gate.add_permits(1);
    wait_for(store.as_ref(), submitted.id, |job| job.completed_rows >= 1).await;
    runner.cancel(submitted.id).await.unwrap();
    gate.add_permits(10);

    let job = submitted.handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_rows >= 1 && job.completed_rows <= 2);
    assert!(job.completed_at.is_some());
    assert_eq!(job.summary.unwrap().total, job.completed_rows);
    assert_eq!(sink.records(job.id).len(), job.completed_rows);

    assert!(matches!(
        runner.cancel(job.id).await,
        Err(AppError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_admission_rejects_when_full() {
    let config = Config {
        max_concurrent_jobs: 2,
        ..real_config()
    };
    let gate = Arc::new(Semaphore::new(0));
    let store = Arc::new(InMemoryJobStore::new());
    let (runner, _sink) = runner_with(config, Arc::new(GatedSmtp { gate: gate.clone() }), store.clone());

    let first = runner.submit(rows(&["a@acme.io"]), None).await.unwrap();
    let second = runner.submit(rows(&["b@acme.io"]), None).await.unwrap();

    let rejected = runner.submit(rows(&["c@acme.io"]), None).await;
    assert!(matches!(
        rejected,
        Err(AppError::TooManyConcurrentJobs {
            running: 2,
            max_allowed: 2
        })
    ));
    assert_eq!(store.count_running().await.unwrap(), 2);

    gate.add_permits(2);
    first.handle.await.unwrap().unwrap();
    second.handle.await.unwrap().unwrap();

    gate.add_permits(1);
    let third = runner.submit(rows(&["c@acme.io"]), None).await.unwrap();
    let job = third.handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_store_write_failures_do_not_abort_job() {
    let store = Arc::new(FlakyStore::new(0));
    let config = Config {
        validator_mode: ValidatorMode::Mock,
        heartbeat_interval_rows: 2,
        ..Config::default()
    };
    let (runner, sink) = runner_with(config, Arc::new(ScriptedSmtp::default()), store.clone());

    let emails = ["a@example.com", "b@gmail.com", "c@acme.io", "d@test.com", "e@gov.gov"];
    let submitted = runner.submit(rows(&emails), None).await.unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(sink.records(job.id).len(), emails.len());
    assert_eq!(job.summary.unwrap().total, emails.len());
    assert_eq!(store.heartbeat_failures.load(Ordering::SeqCst), 2);
    assert!(job.last_heartbeat.is_none());
}

#[tokio::test]
async fn test_panicking_row_is_isolated() {
    let transport = ScriptedSmtp {
        replies: HashMap::from([
            ("first@acme.io".to_string(), 250),
            ("third@acme.io".to_string(), 250),
        ]),
        accept_all_domains: vec![],
        panic_on: Some("second@acme.io".to_string()),
    };
    let store = Arc::new(InMemoryJobStore::new());
    let (runner, sink) = runner_with(real_config(), Arc::new(transport), store.clone());

    let submitted = runner
        .submit(rows(&["first@acme.io", "second@acme.io", "third@acme.io"]), None)
        .await
        .unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let records = sink.records(job.id);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].outcome.reason, ReasonCode::SmtpOk);
    assert_eq!(records[1].outcome.reason, ReasonCode::Unclassified);
    assert_eq!(records[1].outcome.status, VerificationStatus::Risky);
    assert_eq!(records[2].outcome.reason, ReasonCode::SmtpOk);
}

#[tokio::test]
async fn test_original_fields_pass_through() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = Config {
        validator_mode: ValidatorMode::Mock,
        ..Config::default()
    };
    let (runner, sink) = runner_with(config, Arc::new(ScriptedSmtp::default()), store);

    let mut row = BatchRow::from_email("\"Jane\" <Jane@Example.COM>");
    row.fields.insert("company".into(), "Example".into());
    let submitted = runner.submit(vec![row], None).await.unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    let records = sink.records(job.id);
    assert_eq!(records[0].email, "Jane@example.com");
    assert_eq!(records[0].original_fields["company"], "Example");
    assert_eq!(records[0].outcome.reason, ReasonCode::MockValid);
}

#[tokio::test]
async fn test_completed_job_is_not_reopened() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = Config {
        validator_mode: ValidatorMode::Mock,
        ..Config::default()
    };
    let (runner, _sink) = runner_with(config, Arc::new(ScriptedSmtp::default()), store.clone());
    let submitted = runner.submit(rows(&["a@example.com"]), None).await.unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    let reapplied = store
        .set_status(job.id, StatusUpdate::failed("late", Utc::now()))
        .await
        .unwrap();
    assert!(!reapplied);
    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.completed_at, job.completed_at);
}


#[tokio::test(start_paused = true)]
async fn test_terminal_write_survives_transient_store_errors() {
    let store = Arc::new(FlakyStore::new(2));
    let config = Config {
        validator_mode: ValidatorMode::Mock,
        ..Config::default()
    };
    let (runner, _sink) = runner_with(config, Arc::new(ScriptedSmtp::default()), store.clone());

    let submitted = runner
        .submit(rows(&["a@example.com", "b@acme.io"]), None)
        .await
        .unwrap();
    let job = submitted.handle.await.unwrap().unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summary.unwrap().total, 2);
    assert!(job.completed_at.is_some());
    assert_eq!(store.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_write_gives_up_after_bounded_attempts() {
    let store = Arc::new(FlakyStore::new(usize::MAX));
    let config = Config {
        validator_mode: ValidatorMode::Mock,
        ..Config::default()
    };
    let (runner, _sink) = runner_with(config, Arc::new(ScriptedSmtp::default()), store.clone());

    let submitted = runner.submit(rows(&["a@example.com"]), None).await.unwrap();
    let finished = submitted.handle.await.unwrap();

    assert!(matches!(finished, Err(AppError::Store(_))));
    assert_eq!(store.status_calls.load(Ordering::SeqCst), 3);
    let stored = store.get(submitted.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
}
