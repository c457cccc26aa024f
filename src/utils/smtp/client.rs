//! SMTP RCPT probing: the network seam, the lettre-backed transport, and the
//! retry policy layered on top.

use super::error::{classify_io_error, classify_smtp_error, code_value};
use super::result::{ProbeDetail, ProbeResult};
use crate::core::config::{get_jittered_backoff, Config};
use crate::core::error::{AppError, Result};

use async_trait::async_trait;
use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::commands::{Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use rand::Rng;
use std::net::ToSocketAddrs;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One SMTP session: connect, EHLO, MAIL FROM, RCPT TO, QUIT.
///
/// Implementations must bound the whole session by `timeout`, must not return
/// while their connection is still open, and report every failure through the
/// returned [`ProbeResult`].
#[async_trait]
pub trait RcptProbe: Send + Sync {
    async fn rcpt(&self, recipient: &str, mx_host: &str, timeout: Duration) -> ProbeResult;
}

/// Talks to real mail servers using lettre's blocking connection, run on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct LettreRcptProbe {
    sender: String,
    helo_name: String,
    port: u16,
}

impl LettreRcptProbe {
    pub fn new(config: &Config) -> Self {
        Self {
            sender: config.smtp_sender_email.clone(),
            helo_name: config.helo_name.clone(),
            port: 25,
        }
    }

    /// Connects to `port` instead of 25.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

/// Shrinks the socket timeouts to what is left of the session budget.
/// Returns false once the deadline has passed.
fn arm_deadline(conn: &mut SmtpConnection, deadline: Instant) -> bool {
    match remaining(deadline) {
        Some(left) => match conn.set_timeout(Some(left)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(target: "smtp_task", "Could not set SMTP socket timeout: {}", e);
                false
            }
        },
        None => false,
    }
}

fn rcpt_blocking(
    sender: &str,
    helo_name: &str,
    recipient: &str,
    mx_host: &str,
    port: u16,
    timeout: Duration,
) -> ProbeResult {
    let deadline = Instant::now() + timeout;

    let recipient_address = match Address::from_str(recipient) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(target: "smtp_task", "Invalid recipient email format '{}': {}", recipient, e);
            return ProbeResult::failed(ProbeDetail::Other("invalid_recipient".to_string()));
        }
    };
    let sender_address = match Address::from_str(sender) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(target: "smtp_task", "Invalid sender email '{}': {}", sender, e);
            return ProbeResult::failed(ProbeDetail::Other("invalid_sender".to_string()));
        }
    };

    let socket_addr = match (mx_host, port).to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                tracing::error!(target: "smtp_task", "Could not resolve mail server address: {}", mx_host);
                return ProbeResult::failed(ProbeDetail::Other("unresolvable_mx".to_string()));
            }
        },
        Err(e) => return classify_io_error(&e),
    };

    let client_id = ClientId::Domain(helo_name.to_string());
    let mut conn = match SmtpConnection::connect(socket_addr, Some(timeout), &client_id, None, None)
    {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(target: "smtp_task", "SMTP connection failed for {}: {}", mx_host, e);
            return classify_smtp_error(&e, mx_host);
        }
    };

    // Dropping the connection closes the socket without a QUIT round trip.
    if !arm_deadline(&mut conn, deadline) {
        tracing::debug!(target: "smtp_task", "Session budget spent during greeting with {}", mx_host);
        return ProbeResult::timeout();
    }
    if let Err(e) = conn.command(Mail::new(Some(sender_address), vec![])) {
        tracing::error!(target: "smtp_task", "MAIL FROM rejected by {}: {}", mx_host, e);
        if arm_deadline(&mut conn, deadline) {
            conn.quit().ok();
        }
        // A refused sender says nothing about the recipient mailbox.
        let detail = match e.status().and_then(code_value) {
            Some(code) => format!("sender_refused_{}", code),
            None => classify_smtp_error(&e, mx_host).detail.to_string(),
        };
        return ProbeResult::failed(ProbeDetail::Other(detail));
    }

    if !arm_deadline(&mut conn, deadline) {
        return ProbeResult::timeout();
    }
    tracing::debug!(target: "smtp_task", "Sending RCPT TO:<{}> to {}...", recipient, mx_host);
    let result = match conn.command(Rcpt::new(recipient_address, vec![])) {
        Ok(response) => match code_value(response.code()) {
            Some(code) => ProbeResult::responded(
                code,
                response.message().collect::<Vec<&str>>().join(" "),
            ),
            None => ProbeResult::failed(ProbeDetail::Other("unparseable_reply".to_string())),
        },
        Err(e) => classify_smtp_error(&e, mx_host),
    };

    if arm_deadline(&mut conn, deadline) {
        if let Err(e) = conn.quit() {
            tracing::debug!(target: "smtp_task", "Error during SMTP QUIT on {}: {}", mx_host, e);
        }
    }
    result
}

#[async_trait]
impl RcptProbe for LettreRcptProbe {
    async fn rcpt(&self, recipient: &str, mx_host: &str, timeout: Duration) -> ProbeResult {
        let sender = self.sender.clone();
        let helo_name = self.helo_name.clone();
        let recipient_owned = recipient.to_string();
        let mx_owned = mx_host.to_string();
        let port = self.port;

        let mut session = tokio::task::spawn_blocking(move || {
            rcpt_blocking(&sender, &helo_name, &recipient_owned, &mx_owned, port, timeout)
        });

        match tokio::time::timeout(timeout, &mut session).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                tracing::error!(target: "smtp_task",
                    "SMTP session task for <{}> via {} failed: {}", recipient, mx_host, join_err);
                ProbeResult::failed(ProbeDetail::Other("probe_task_failed".to_string()))
            }
            Err(_) => {
                tracing::warn!(target: "smtp_task",
                    "SMTP session for <{}> via {} exceeded {:?}", recipient, mx_host, timeout);
                // The socket stays open until the blocking session returns, and
                // the caller's concurrency slot must cover it until then.
                if let Err(join_err) = session.await {
                    tracing::debug!(target: "smtp_task", "Timed out SMTP session task ended with: {}", join_err);
                }
                ProbeResult::timeout()
            }
        }
    }
}

/// Applies the retry policy and catch-all detection on top of a [`RcptProbe`].
#[derive(Clone)]
pub struct SmtpProbe {
    transport: Arc<dyn RcptProbe>,
    config: Arc<Config>,
}

impl SmtpProbe {
    pub fn new(transport: Arc<dyn RcptProbe>, config: Arc<Config>) -> Self {
        Self { transport, config }
    }

    pub async fn single_attempt(
        &self,
        recipient: &str,
        mx_host: &str,
        timeout: Duration,
    ) -> ProbeResult {
        self.transport.rcpt(recipient, mx_host, timeout).await
    }

    /// Probes `recipient` up to `smtp_retries + 1` times.
    ///
    /// Stops at the first 250 or hard reject. Transport failures and 421/450/451/452
    /// are retried after a jittered backoff; any other reply ends the loop. The last
    /// observed result is returned.
    pub async fn probe_with_retry(&self, recipient: &str, mx_host: &str) -> ProbeResult {
        let max_attempts = self.config.smtp_retries + 1;
        let mut last = ProbeResult::failed(ProbeDetail::Other("not_attempted".to_string()));

        for attempt in 0..max_attempts {
            tracing::debug!(target: "smtp_task",
                "Attempt {}/{} to verify <{}> via SMTP server {}",
                attempt + 1, max_attempts, recipient, mx_host
            );
            last = self
                .single_attempt(recipient, mx_host, self.config.smtp_timeout)
                .await;

            if last.is_accepted() || last.is_hard_reject() {
                tracing::debug!(target: "smtp_task",
                    "SMTP check for <{}> conclusive ({:?}) on attempt {}.",
                    recipient, last.code, attempt + 1
                );
                return last;
            }
            if !last.is_transient() {
                tracing::warn!(target: "smtp_task",
                    "SMTP check for <{}> got non-retriable reply {:?} on attempt {}. Stopping.",
                    recipient, last.code, attempt + 1
                );
                return last;
            }

            if attempt + 1 < max_attempts {
                let sleep_duration = get_jittered_backoff(&self.config);
                tracing::warn!(target: "smtp_task",
                    "SMTP check for <{}> inconclusive on attempt {} ({}). Retrying in {:?}.",
                    recipient, attempt + 1, last.detail, sleep_duration
                );
                tokio::time::sleep(sleep_duration).await;
            }
        }

        tracing::info!(target: "smtp_task",
            "Final SMTP result for <{}> via {} after {} attempts: code={:?}, detail='{}'",
            recipient, mx_host, max_attempts, last.code, last.detail
        );
        last
    }

    /// Probes a random, almost certainly nonexistent mailbox at `domain`.
    /// Only a 250 counts as catch-all; every failure reads as "not catch-all".
    pub async fn probe_catch_all(&self, domain: &str, mx_host: &str) -> bool {
        let synthetic = format!(
            "no-reply-does-not-exist-{}-{:x}@{}",
            rand::thread_rng().gen_range(10000..99999),
            rand::thread_rng().gen::<u32>(),
            domain
        );
        tracing::debug!(target: "smtp_task",
            "Performing catch-all check with RCPT TO:<{}> on {}", synthetic, mx_host);

        let result = self
            .single_attempt(&synthetic, mx_host, self.config.smtp_timeout)
            .await;
        let is_catch_all = result.is_accepted();
        if is_catch_all {
            tracing::warn!(target: "smtp_task",
                "Domain {} (MX: {}) appears to be a catch-all (accepted random user {})",
                domain, mx_host, synthetic
            );
        }
        is_catch_all
    }
}

/// Tests basic SMTP connectivity to a known reliable server (Google).
/// This helps diagnose if outbound port 25 is generally blocked.
pub async fn test_smtp_connectivity(config: &Config) -> Result<()> {
    tracing::info!("Testing outbound SMTP (port 25) connectivity to Google...");

    let test_server = "gmail-smtp-in.l.google.com";
    let timeout = Duration::from_secs(5);
    let helo_name = config.helo_name.clone();

    let attempt = tokio::task::spawn_blocking(move || -> Result<()> {
        let socket_addr = (test_server, 25_u16)
            .to_socket_addrs()
            .map_err(|e| {
                AppError::Config(format!("DNS resolution failed for {}: {}", test_server, e))
            })?
            .next()
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Could not resolve any IP address for {}",
                    test_server
                ))
            })?;
        let client_id = ClientId::Domain(helo_name);
        let mut conn = SmtpConnection::connect(socket_addr, Some(timeout), &client_id, None, None)?;
        conn.quit().ok();
        Ok(())
    });

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!(
                "SMTP connectivity test successful (connected to {}).",
                test_server
            );
            Ok(())
        }
        Ok(Ok(Err(AppError::Smtp(e)))) => {
            tracing::error!(
                "SMTP connectivity test failed: Error connecting to {}: {}",
                test_server,
                e
            );
            let err_str = e.to_string().to_lowercase();
            if err_str.contains("connection refused") || err_str.contains("network is unreachable")
            {
                Err(AppError::SmtpInconclusive(format!(
                    "Connection to {} refused or network unreachable. Check firewall or network settings.",
                    test_server
                )))
            } else {
                Err(AppError::Smtp(e))
            }
        }
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(join_err)) => Err(AppError::Task(join_err.to_string())),
        Err(_) => {
            tracing::error!(
                "SMTP connectivity test timed out connecting to {}. Outbound port 25 is likely blocked by ISP, firewall, or network provider.",
                test_server
            );
            Err(AppError::SmtpInconclusive(
                "SMTP connection timed out - port 25 is likely blocked.".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of results and records every call.
    struct ScriptedProbe {
        script: Mutex<VecDeque<ProbeResult>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<ProbeResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl RcptProbe for ScriptedProbe {
        async fn rcpt(&self, recipient: &str, _mx_host: &str, _timeout: Duration) -> ProbeResult {
            self.calls.lock().push(recipient.to_string());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| ProbeResult::responded(250, "OK"))
        }
    }

    fn probe_with(script: Vec<ProbeResult>, retries: u32) -> (SmtpProbe, Arc<ScriptedProbe>) {
        let transport = ScriptedProbe::new(script);
        let config = Config {
            smtp_retries: retries,
            retry_backoff: Duration::from_millis(800),
            retry_jitter: Duration::from_millis(300),
            ..Config::default()
        };
        (
            SmtpProbe::new(transport.clone(), Arc::new(config)),
            transport,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_reject_is_never_retried() {
        for code in 550..=554 {
            let (probe, transport) = probe_with(vec![ProbeResult::responded(code, "no")], 3);
            let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
            assert_eq!(result.code, Some(code));
            assert_eq!(transport.call_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let (probe, transport) = probe_with(
            vec![
                ProbeResult::responded(450, "greylisted"),
                ProbeResult::responded(250, "OK"),
            ],
            1,
        );
        let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
        assert!(result.is_accepted());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_retries() {
        let (probe, transport) = probe_with(
            vec![
                ProbeResult::timeout(),
                ProbeResult::failed(ProbeDetail::ConnectionReset),
                ProbeResult::responded(451, "later"),
            ],
            2,
        );
        let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
        assert_eq!(result.code, Some(451));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(result.to_reason(true).to_string(), "temp_fail_451_after_retry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let (probe, transport) = probe_with(vec![ProbeResult::timeout()], 0);
        let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
        assert_eq!(result, ProbeResult::timeout());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_code_stops_immediately() {
        let (probe, transport) = probe_with(vec![ProbeResult::responded(502, "huh")], 3);
        let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
        assert_eq!(result.code, Some(502));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let (probe, _transport) = probe_with(
            vec![ProbeResult::timeout(), ProbeResult::responded(250, "OK")],
            1,
        );
        let started = tokio::time::Instant::now();
        probe.probe_with_retry("a@b.com", "mx.b.com").await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed <= Duration::from_millis(1100));
    }

    /// Holds every session for its full budget before timing out.
    struct StallingProbe;

    #[async_trait]
    impl RcptProbe for StallingProbe {
        async fn rcpt(&self, _recipient: &str, _mx_host: &str, timeout: Duration) -> ProbeResult {
            tokio::time::sleep(timeout).await;
            ProbeResult::timeout()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cycle_fits_max_probe_latency() {
        let config = Arc::new(Config {
            smtp_timeout: Duration::from_secs(3),
            smtp_retries: 2,
            ..Config::default()
        });
        let probe = SmtpProbe::new(Arc::new(StallingProbe), config.clone());

        let started = tokio::time::Instant::now();
        let result = probe.probe_with_retry("a@b.com", "mx.b.com").await;
        let elapsed = started.elapsed();

        assert_eq!(result.to_reason(true).to_string(), "timeout_after_retry");
        assert!(elapsed >= Duration::from_secs(9));
        assert!(elapsed <= config.max_probe_latency());
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_all_only_on_250() {
        let (probe, transport) = probe_with(vec![ProbeResult::responded(250, "OK")], 1);
        assert!(probe.probe_catch_all("Example.com", "mx.example.com").await);
        let calls = transport.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("@Example.com"));
        assert!(calls[0].starts_with("no-reply-does-not-exist-"));

        let (probe, _) = probe_with(vec![ProbeResult::responded(550, "no")], 1);
        assert!(!probe.probe_catch_all("example.com", "mx.example.com").await);

        let (probe, _) = probe_with(vec![ProbeResult::timeout()], 1);
        assert!(!probe.probe_catch_all("example.com", "mx.example.com").await);
    }
}
