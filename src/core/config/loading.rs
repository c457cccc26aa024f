//! Handles loading configuration from files and applying it to the Config struct.

use super::{Config, ConfigFile, Result, ValidatorMode};
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Loads configuration settings from a TOML file.
/// Returns the parsed `ConfigFile` content.
pub(crate) fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!(
            "File not found or is not a file: {}",
            file_path
        ));
    }
    tracing::debug!("Attempting to read config file: {}", file_path);
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    parse_config_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))
}

pub(crate) fn parse_config_str(content: &str) -> anyhow::Result<ConfigFile> {
    let config_file_content: ConfigFile = toml::from_str(content)?;
    Ok(config_file_content)
}

fn lowered_set(items: &[String]) -> std::collections::HashSet<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Applies settings from a parsed `ConfigFile` onto a mutable `Config` instance.
/// Only fields present in the file are changed.
pub(crate) fn apply_file_config(config: &mut Config, file_config: &ConfigFile) -> Result<()> {
    // DNS
    if let Some(timeout) = file_config.dns.dns_timeout {
        config.dns_timeout = Duration::from_secs(timeout);
    }
    if let Some(ref servers) = file_config.dns.dns_servers {
        if !servers.is_empty() {
            config.dns_servers = servers.clone();
        }
    }
    if let Some(minutes) = file_config.dns.mx_cache_ttl_minutes {
        config.mx_cache_ttl = Duration::from_secs(minutes * 60);
    }

    // SMTP
    if let Some(timeout) = file_config.smtp.smtp_timeout {
        config.smtp_timeout = Duration::from_secs(timeout);
    }
    if let Some(ref sender) = file_config.smtp.smtp_sender_email {
        config.smtp_sender_email = sender.trim().to_string();
    }
    if let Some(ref helo) = file_config.smtp.helo_name {
        config.helo_name = helo.trim().to_string();
    }
    if let Some(retries) = file_config.smtp.retries {
        config.smtp_retries = retries;
    }
    if let Some(ms) = file_config.smtp.retry_backoff_ms {
        config.retry_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = file_config.smtp.retry_jitter_ms {
        config.retry_jitter = Duration::from_millis(ms);
    }
    if let Some(ms) = file_config.smtp.retry_backoff_floor_ms {
        config.retry_backoff_floor = Duration::from_millis(ms);
    }
    if let Some(minutes) = file_config.smtp.catch_all_cache_ttl_minutes {
        config.catch_all_cache_ttl = Duration::from_secs(minutes * 60);
    }

    // Concurrency
    if let Some(workers) = file_config.concurrency.smtp_global_workers {
        config.smtp_global_workers = workers;
    }
    if let Some(limit) = file_config.concurrency.smtp_per_domain_limit {
        config.smtp_per_domain_limit = limit;
    }
    if let Some(jobs) = file_config.concurrency.max_concurrent_jobs {
        config.max_concurrent_jobs = jobs;
    }

    // Jobs
    if let Some(rows) = file_config.jobs.heartbeat_interval_rows {
        config.heartbeat_interval_rows = rows;
    }
    if let Some(minutes) = file_config.jobs.stall_timeout_minutes {
        config.stall_timeout = Duration::from_secs(minutes * 60);
    }
    if let Some(secs) = file_config.jobs.monitor_interval_secs {
        config.monitor_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = file_config.jobs.stall_cooldown_secs {
        config.stall_cooldown = Duration::from_secs(secs);
    }
    if let Some(secs) = file_config.jobs.monitor_shutdown_timeout_secs {
        config.monitor_shutdown_timeout = Duration::from_secs(secs);
    }

    // Policy lists replace the defaults wholesale
    if let Some(ref domains) = file_config.policy.disposable_domains {
        config.disposable_domains = lowered_set(domains);
    }
    if let Some(ref prefixes) = file_config.policy.role_based_prefixes {
        config.role_based_prefixes = lowered_set(prefixes);
    }
    if let Some(ref providers) = file_config.policy.free_email_providers {
        config.free_email_providers = lowered_set(providers);
    }

    // Validator
    if let Some(ref mode) = file_config.validator.mode {
        config.validator_mode = mode.parse::<ValidatorMode>()?;
    }

    Ok(())
}
