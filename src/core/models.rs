//! Data records shared between the verification engine and the job runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// A syntactically split email address.
///
/// The local part keeps its original case (RFC 5321 treats it as case-sensitive);
/// the domain is always lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    local: String,
    domain: String,
}

impl Address {
    /// Splits `email` into local part and domain. Returns `None` unless the input
    /// contains exactly one `@` with non-empty text on both sides.
    pub fn parse(email: &str) -> Option<Self> {
        let trimmed = email.trim();
        let (local, domain) = trimmed.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self {
            local: local.to_string(),
            domain: domain.to_lowercase(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Valid,
    Risky,
    Invalid,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Valid => write!(f, "valid"),
            VerificationStatus::Risky => write!(f, "risky"),
            VerificationStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// Coarse classification of why an address did not verify cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    SyntaxInvalid,
    PolicyReject,
    ResolutionFailure,
    TransportFailure,
    ProtocolReject,
    ProtocolTransient,
    Unclassified,
}

/// Why an address received its status. Rendered as the stable snake_case codes
/// consumers see (`smtp_reject_550`, `temp_fail_450_after_retry`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    BadSyntax,
    EmptyEmail,
    DisposableDomain,
    RoleBased,
    NoMx,
    NoMxDnsTimeout,
    SmtpOk,
    /// 550-554 on RCPT TO.
    SmtpReject(u16),
    /// Transport timeout with retries disabled.
    SmtpTimeout,
    /// Transport timeout on every attempt.
    TimeoutAfterRetry,
    ConnectionRefused,
    ConnectionReset,
    /// Any other transport failure, carrying the probe's detail text.
    ConnectionError(String),
    TempFail {
        code: u16,
        after_retry: bool,
    },
    DomainAcceptsAll,
    MockValid,
    MockRisky,
    /// An SMTP reply outside the recognised success/transient/reject sets.
    SmtpCode(u16),
    /// Verification itself failed unexpectedly for this row.
    Unclassified,
}

impl ReasonCode {
    /// The status an address carries for this reason.
    pub fn status(&self) -> VerificationStatus {
        match self {
            ReasonCode::SmtpOk | ReasonCode::MockValid => VerificationStatus::Valid,
            ReasonCode::BadSyntax
            | ReasonCode::EmptyEmail
            | ReasonCode::DisposableDomain
            | ReasonCode::NoMx
            | ReasonCode::NoMxDnsTimeout
            | ReasonCode::SmtpReject(_)
            | ReasonCode::SmtpCode(_) => VerificationStatus::Invalid,
            ReasonCode::RoleBased
            | ReasonCode::SmtpTimeout
            | ReasonCode::TimeoutAfterRetry
            | ReasonCode::ConnectionRefused
            | ReasonCode::ConnectionReset
            | ReasonCode::ConnectionError(_)
            | ReasonCode::TempFail { .. }
            | ReasonCode::DomainAcceptsAll
            | ReasonCode::MockRisky
            | ReasonCode::Unclassified => VerificationStatus::Risky,
        }
    }

    /// `None` for reasons that represent a clean verification.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            ReasonCode::SmtpOk | ReasonCode::MockValid => None,
            ReasonCode::BadSyntax | ReasonCode::EmptyEmail => Some(FailureClass::SyntaxInvalid),
            ReasonCode::DisposableDomain | ReasonCode::RoleBased => {
                Some(FailureClass::PolicyReject)
            }
            ReasonCode::NoMx | ReasonCode::NoMxDnsTimeout => Some(FailureClass::ResolutionFailure),
            ReasonCode::SmtpTimeout
            | ReasonCode::TimeoutAfterRetry
            | ReasonCode::ConnectionRefused
            | ReasonCode::ConnectionReset
            | ReasonCode::ConnectionError(_) => Some(FailureClass::TransportFailure),
            ReasonCode::SmtpReject(_) | ReasonCode::SmtpCode(_) => {
                Some(FailureClass::ProtocolReject)
            }
            ReasonCode::TempFail { .. } | ReasonCode::DomainAcceptsAll | ReasonCode::MockRisky => {
                Some(FailureClass::ProtocolTransient)
            }
            ReasonCode::Unclassified => Some(FailureClass::Unclassified),
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::BadSyntax => write!(f, "bad_syntax"),
            ReasonCode::EmptyEmail => write!(f, "empty_email"),
            ReasonCode::DisposableDomain => write!(f, "disposable_domain"),
            ReasonCode::RoleBased => write!(f, "role_based"),
            ReasonCode::NoMx => write!(f, "no_mx"),
            ReasonCode::NoMxDnsTimeout => write!(f, "no_mx_dns_timeout"),
            ReasonCode::SmtpOk => write!(f, "smtp_ok"),
            ReasonCode::SmtpReject(code) => write!(f, "smtp_reject_{}", code),
            ReasonCode::SmtpTimeout => write!(f, "smtp_timeout"),
            ReasonCode::TimeoutAfterRetry => write!(f, "timeout_after_retry"),
            ReasonCode::ConnectionRefused => write!(f, "connection_refused"),
            ReasonCode::ConnectionReset => write!(f, "connection_reset"),
            ReasonCode::ConnectionError(detail) => write!(f, "connection_error_{}", detail),
            ReasonCode::TempFail { code, after_retry } => {
                if *after_retry {
                    write!(f, "temp_fail_{}_after_retry", code)
                } else {
                    write!(f, "temp_fail_{}", code)
                }
            }
            ReasonCode::DomainAcceptsAll => write!(f, "domain_accepts_all"),
            ReasonCode::MockValid => write!(f, "mock_valid"),
            ReasonCode::MockRisky => write!(f, "mock_risky"),
            ReasonCode::SmtpCode(code) => write!(f, "smtp_{}", code),
            ReasonCode::Unclassified => write!(f, "unclassified"),
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Tags explaining the deductions applied to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    InvalidSyntax,
    EmptyEmail,
    DisposableProvider,
    NoMailServer,
    MailboxNotFound,
    RoleBasedEmail,
    SmtpUnreachable,
    SmtpConnectionFailed,
    TemporarySmtpFailure,
    SmtpError,
    CatchAllDomain,
    UnverifiableDomain,
    FreeEmailProvider,
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RiskFactor::InvalidSyntax => "invalid_syntax",
            RiskFactor::EmptyEmail => "empty_email",
            RiskFactor::DisposableProvider => "disposable_provider",
            RiskFactor::NoMailServer => "no_mail_server",
            RiskFactor::MailboxNotFound => "mailbox_not_found",
            RiskFactor::RoleBasedEmail => "role_based_email",
            RiskFactor::SmtpUnreachable => "smtp_unreachable",
            RiskFactor::SmtpConnectionFailed => "smtp_connection_failed",
            RiskFactor::TemporarySmtpFailure => "temporary_smtp_failure",
            RiskFactor::SmtpError => "smtp_error",
            RiskFactor::CatchAllDomain => "catch_all_domain",
            RiskFactor::UnverifiableDomain => "unverifiable_domain",
            RiskFactor::FreeEmailProvider => "free_email_provider",
        };
        f.write_str(tag)
    }
}

/// Final verdict for one address. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub reason: ReasonCode,
    pub score: u8,
    pub risk_factors: BTreeSet<RiskFactor>,
}

/// Opaque identifier of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate statistics over every row a job processed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub valid: usize,
    pub risky: usize,
    pub invalid: usize,
    pub total: usize,
    /// Mean score rounded to one decimal place.
    pub avg_score: f64,
    /// Up to five most frequent risk factors, most frequent first.
    pub top_risk_factors: Vec<RiskFactor>,
}

/// Incrementally builds a [`JobSummary`] while rows stream through the runner.
#[derive(Debug, Default)]
pub struct SummaryAccumulator {
    valid: usize,
    risky: usize,
    invalid: usize,
    total: usize,
    score_sum: u64,
    factor_counts: HashMap<RiskFactor, usize>,
}

impl SummaryAccumulator {
    const TOP_RISK_FACTORS: usize = 5;

    pub fn record(&mut self, outcome: &VerificationOutcome) {
        match outcome.status {
            VerificationStatus::Valid => self.valid += 1,
            VerificationStatus::Risky => self.risky += 1,
            VerificationStatus::Invalid => self.invalid += 1,
        }
        self.total += 1;
        self.score_sum += u64::from(outcome.score);
        for factor in &outcome.risk_factors {
            *self.factor_counts.entry(*factor).or_insert(0) += 1;
        }
    }

    pub fn summary(&self) -> JobSummary {
        let avg_score = if self.total > 0 {
            let raw = self.score_sum as f64 / self.total as f64;
            (raw * 10.0).round() / 10.0
        } else {
            0.0
        };

        let mut counted: Vec<(RiskFactor, usize)> =
            self.factor_counts.iter().map(|(f, c)| (*f, *c)).collect();
        // Ties broken by tag order so the summary is reproducible.
        counted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        JobSummary {
            valid: self.valid,
            risky: self.risky,
            invalid: self.invalid,
            total: self.total,
            avg_score,
            top_risk_factors: counted
                .into_iter()
                .take(Self::TOP_RISK_FACTORS)
                .map(|(f, _)| f)
                .collect(),
        }
    }
}

/// Durable record of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: Option<String>,
    pub total_rows: usize,
    pub completed_rows: usize,
    pub processing_row: usize,
    pub status: JobStatus,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<JobSummary>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(total_rows: usize, name: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            name,
            total_rows,
            completed_rows: 0,
            processing_row: 0,
            status: JobStatus::Running,
            cancel_requested: false,
            created_at: Utc::now(),
            last_heartbeat: None,
            completed_at: None,
            summary: None,
            error_message: None,
        }
    }

    /// Timestamp used for liveness: last heartbeat, falling back to creation time.
    pub fn liveness_timestamp(&self) -> DateTime<Utc> {
        self.last_heartbeat.unwrap_or(self.created_at)
    }
}

/// One input row handed over by the batch intake layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRow {
    /// Raw contents of the address column, before extraction/normalization.
    pub raw_email: String,
    /// Every original column, passed through untouched to the result sink.
    pub fields: BTreeMap<String, String>,
}

impl BatchRow {
    pub fn from_email(raw_email: impl Into<String>) -> Self {
        Self {
            raw_email: raw_email.into(),
            fields: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: VerificationStatus, score: u8, factors: &[RiskFactor]) -> VerificationOutcome {
        VerificationOutcome {
            status,
            reason: ReasonCode::SmtpOk,
            score,
            risk_factors: factors.iter().copied().collect(),
        }
    }

    #[test]
    fn test_address_parse() {
        let addr = Address::parse(" John.Doe@Example.COM ").unwrap();
        assert_eq!(addr.local(), "John.Doe");
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.to_string(), "John.Doe@example.com");

        assert!(Address::parse("no-at-sign").is_none());
        assert!(Address::parse("@example.com").is_none());
        assert!(Address::parse("user@").is_none());
        assert!(Address::parse("a@b@c.com").is_none());
    }

    #[test]
    fn test_reason_code_rendering() {
        assert_eq!(ReasonCode::SmtpReject(550).to_string(), "smtp_reject_550");
        assert_eq!(
            ReasonCode::TempFail { code: 451, after_retry: true }.to_string(),
            "temp_fail_451_after_retry"
        );
        assert_eq!(
            ReasonCode::TempFail { code: 421, after_retry: false }.to_string(),
            "temp_fail_421"
        );
        assert_eq!(ReasonCode::SmtpCode(502).to_string(), "smtp_502");
        assert_eq!(
            serde_json::to_string(&ReasonCode::NoMxDnsTimeout).unwrap(),
            "\"no_mx_dns_timeout\""
        );
    }

    #[test]
    fn test_reason_status_mapping() {
        assert_eq!(ReasonCode::SmtpOk.status(), VerificationStatus::Valid);
        assert_eq!(ReasonCode::SmtpReject(553).status(), VerificationStatus::Invalid);
        assert_eq!(ReasonCode::TimeoutAfterRetry.status(), VerificationStatus::Risky);
        assert_eq!(ReasonCode::DomainAcceptsAll.status(), VerificationStatus::Risky);
        assert_eq!(
            ReasonCode::Unclassified.failure_class(),
            Some(FailureClass::Unclassified)
        );
        assert_eq!(ReasonCode::SmtpOk.failure_class(), None);
    }

    #[test]
    fn test_risk_factor_serializes_as_tag() {
        assert_eq!(
            serde_json::to_string(&RiskFactor::RoleBasedEmail).unwrap(),
            "\"role_based_email\""
        );
        assert_eq!(RiskFactor::CatchAllDomain.to_string(), "catch_all_domain");
    }

    #[test]
    fn test_summary_accumulator() {
        let mut acc = SummaryAccumulator::default();
        acc.record(&outcome(VerificationStatus::Valid, 100, &[]));
        acc.record(&outcome(
            VerificationStatus::Risky,
            75,
            &[RiskFactor::RoleBasedEmail],
        ));
        acc.record(&outcome(
            VerificationStatus::Invalid,
            0,
            &[RiskFactor::NoMailServer],
        ));
        acc.record(&outcome(
            VerificationStatus::Risky,
            70,
            &[RiskFactor::RoleBasedEmail, RiskFactor::FreeEmailProvider],
        ));

        let summary = acc.summary();
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.risky, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.avg_score, 61.3);
        assert_eq!(summary.top_risk_factors[0], RiskFactor::RoleBasedEmail);
        assert_eq!(summary.top_risk_factors.len(), 3);
    }

    #[test]
    fn test_empty_summary() {
        let summary = SummaryAccumulator::default().summary();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.avg_score, 0.0);
        assert!(summary.top_risk_factors.is_empty());
    }

    #[test]
    fn test_job_liveness_falls_back_to_creation() {
        let mut job = Job::new(10, None);
        assert_eq!(job.liveness_timestamp(), job.created_at);
        let later = job.created_at + chrono::Duration::seconds(30);
        job.last_heartbeat = Some(later);
        assert_eq!(job.liveness_timestamp(), later);
        assert!(!job.status.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
