//! Contains validation logic for the final Config struct.

use super::{Config, Result};
use crate::core::error::AppError;
use std::time::Duration;

/// Validates the configuration settings after loading and potential overrides.
/// Mutates the config to clamp values where a safe correction exists; rejects the rest.
pub(crate) fn validate_config(config: &mut Config) -> Result<()> {
    if config.max_concurrent_jobs < 1 || config.max_concurrent_jobs > 20 {
        return Err(AppError::Config(format!(
            "max_concurrent_jobs must be between 1 and 20, got {}",
            config.max_concurrent_jobs
        )));
    }
    let stall_minutes = config.stall_timeout.as_secs() / 60;
    if config.stall_timeout.as_secs() % 60 != 0 || !(1..=60).contains(&stall_minutes) {
        return Err(AppError::Config(format!(
            "stall timeout must be a whole number of minutes between 1 and 60, got {:?}",
            config.stall_timeout
        )));
    }
    if config.smtp_global_workers == 0 {
        tracing::warn!("SMTP global workers was set to 0. Setting to 1.");
        config.smtp_global_workers = 1;
    }
    if config.smtp_per_domain_limit == 0 {
        tracing::warn!("SMTP per-domain limit was set to 0. Setting to 1.");
        config.smtp_per_domain_limit = 1;
    }
    if config.smtp_per_domain_limit > config.smtp_global_workers {
        tracing::warn!(
            "Per-domain limit ({}) > global workers ({}). Clamping per-domain limit.",
            config.smtp_per_domain_limit,
            config.smtp_global_workers
        );
        config.smtp_per_domain_limit = config.smtp_global_workers;
    }
    if config.heartbeat_interval_rows == 0 {
        tracing::warn!("Heartbeat interval was set to 0 rows. Setting to 1.");
        config.heartbeat_interval_rows = 1;
    }
    if config.smtp_timeout.is_zero() || config.dns_timeout.is_zero() {
        return Err(AppError::Config(
            "SMTP and DNS timeouts must be greater than zero.".to_string(),
        ));
    }
    if stall_budget_too_small(config) {
        tracing::warn!(
            "Stall timeout {:?} is shorter than {} rows at the worst-case probe latency of {:?}; \
             slow but healthy jobs may be failed as stalled.",
            config.stall_timeout,
            config.heartbeat_interval_rows,
            config.max_probe_latency()
        );
    }
    if config.monitor_interval.is_zero() {
        tracing::warn!("Monitor interval was set to 0. Setting to 1s.");
        config.monitor_interval = Duration::from_secs(1);
    }
    if config.dns_servers.is_empty() {
        tracing::warn!("DNS servers list is empty. Resolver will use system defaults.");
    }
    if !config.smtp_sender_email.contains('@') || !config.smtp_sender_email.contains('.') {
        return Err(AppError::Config(format!(
            "Invalid SMTP sender email format: {}",
            config.smtp_sender_email
        )));
    }
    if config.helo_name.trim().is_empty() {
        return Err(AppError::Config("HELO name cannot be empty.".to_string()));
    }
    Ok(())
}

/// A heartbeat is written every `heartbeat_interval_rows` rows. Each real-mode
/// row can spend up to one catch-all session plus a full retry cycle on SMTP.
pub(crate) fn stall_budget_too_small(config: &Config) -> bool {
    let per_row = config.smtp_timeout + config.max_probe_latency();
    let rows = u32::try_from(config.heartbeat_interval_rows).unwrap_or(u32::MAX);
    per_row
        .checked_mul(rows)
        .map_or(true, |window| window > config.stall_timeout)
}
