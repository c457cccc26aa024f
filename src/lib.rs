//! # Lead Validator Core Library
//!
//! This crate checks whether email addresses are likely deliverable without
//! sending mail. Each address goes through syntax and policy checks, an MX
//! lookup, a catch-all probe and an SMTP `RCPT TO` probe, and comes out with a
//! status, a reason code, a 0-100 score and a set of risk factors.
//!
//! Batches run as jobs: the [`JobRunner`] processes rows one at a time, records
//! progress and heartbeats in a [`JobStore`], and the [`StallMonitor`] fails
//! jobs whose heartbeat goes silent.
//!
//! It is designed to be used either directly as a library or via the
//! `lead-validator` command-line tool.

mod core;
mod jobs;
mod utils;

pub use crate::core::config::{get_jittered_backoff, Config, ConfigBuilder, ConfigFile, ValidatorMode};
pub use crate::core::error::{AppError, Result};
pub use crate::core::models::{
    Address, BatchRow, FailureClass, Job, JobId, JobStatus, JobSummary, ReasonCode, RiskFactor,
    SummaryAccumulator, VerificationOutcome, VerificationStatus,
};
pub use crate::core::scoring::ScoringEngine;
pub use crate::core::verifier::EmailVerifier;
pub use crate::jobs::monitor::StallMonitor;
pub use crate::jobs::runner::{JobRunner, SubmittedJob};
pub use crate::jobs::sink::{InMemoryResultSink, JsonLinesSink, ResultRecord, ResultSink};
pub use crate::jobs::store::{InMemoryJobStore, JobStore, StatusUpdate};
pub use crate::utils::address::{clean_address_field, extract_email_from_field, normalize_email};
pub use crate::utils::cache::{CacheStats, CatchAllCache, MxCache, TtlCache};
pub use crate::utils::dns::{create_resolver, MxLookupOutcome, MxResolver, TrustDnsMxResolver};
pub use crate::utils::governor::{ConcurrencyGovernor, ConcurrencyPermit};
pub use crate::utils::smtp::{LettreRcptProbe, ProbeDetail, ProbeResult, RcptProbe, SmtpProbe};

use std::sync::Arc;

/// Builds a verifier backed by the system (or configured) DNS resolver and a
/// live SMTP transport.
pub fn initialize_verifier(config: Arc<Config>) -> Result<EmailVerifier> {
    EmailVerifier::from_config(config)
}

/// Performs an early check for outbound SMTP connectivity.
pub async fn check_smtp_connectivity(config: &Config) -> Result<()> {
    crate::utils::smtp::test_smtp_connectivity(config).await
}

/// Verifies a single address with a fresh verifier.
///
/// Convenient for one-off checks; batch callers should share one
/// [`EmailVerifier`] so caches and concurrency limits apply across rows.
pub async fn verify_single_email(config: Arc<Config>, email: &str) -> Result<VerificationOutcome> {
    let verifier = initialize_verifier(config)?;
    Ok(verifier.verify(email).await)
}
