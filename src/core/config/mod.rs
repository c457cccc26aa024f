//! Defines the core runtime `Config` struct, its defaults, and related utilities.
//! Submodules handle loading, building, and validation.

pub(crate) mod builder;
pub(crate) mod file;
pub(crate) mod loading;
pub(crate) mod validation;

pub use builder::ConfigBuilder;
pub use file::ConfigFile;

use crate::core::error::{AppError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Selects between live network verification and deterministic offline rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidatorMode {
    /// DNS and SMTP checks hit the network.
    #[default]
    Real,
    /// Fixed rules, no network I/O. Used for reproducible test runs.
    Mock,
}

impl FromStr for ValidatorMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "real" => Ok(ValidatorMode::Real),
            "mock" => Ok(ValidatorMode::Mock),
            other => Err(AppError::Config(format!(
                "Validator mode must be 'real' or 'mock', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ValidatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatorMode::Real => write!(f, "real"),
            ValidatorMode::Mock => write!(f, "mock"),
        }
    }
}

/// Runtime configuration settings used by the verification engine and job runner.
#[derive(Clone)]
pub struct Config {
    pub validator_mode: ValidatorMode,

    pub dns_timeout: Duration,
    pub dns_servers: Vec<String>,
    pub mx_cache_ttl: Duration,

    pub smtp_timeout: Duration,
    pub smtp_sender_email: String,
    pub helo_name: String,
    pub smtp_retries: u32,
    pub retry_backoff: Duration,
    pub retry_jitter: Duration,
    pub retry_backoff_floor: Duration,
    pub catch_all_cache_ttl: Duration,

    pub smtp_global_workers: usize,
    pub smtp_per_domain_limit: usize,
    pub max_concurrent_jobs: usize,

    pub heartbeat_interval_rows: usize,
    pub stall_timeout: Duration,
    pub monitor_interval: Duration,
    pub stall_cooldown: Duration,
    pub monitor_shutdown_timeout: Duration,

    pub email_regex: Regex,
    pub disposable_domains: HashSet<String>,
    pub role_based_prefixes: HashSet<String>,
    pub free_email_providers: HashSet<String>,

    pub loaded_config_path: Option<String>,
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Config {
    fn build_default() -> Self {
        let email_regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .expect("Default email regex pattern failed to compile. This is a bug.");
        let dns_servers = vec![
            "8.8.8.8".to_string(),
            "8.8.4.4".to_string(),
            "1.1.1.1".to_string(),
            "1.0.0.1".to_string(),
        ];

        Config {
            validator_mode: ValidatorMode::Real,
            dns_timeout: Duration::from_secs(5),
            dns_servers,
            mx_cache_ttl: Duration::from_secs(30 * 60),
            smtp_timeout: Duration::from_secs(10),
            smtp_sender_email: "verifier@example.com".to_string(),
            helo_name: "example.com".to_string(),
            smtp_retries: 1,
            retry_backoff: Duration::from_millis(800),
            retry_jitter: Duration::from_millis(300),
            retry_backoff_floor: Duration::from_millis(100),
            catch_all_cache_ttl: Duration::from_secs(24 * 60 * 60),
            smtp_global_workers: 10,
            smtp_per_domain_limit: 2,
            max_concurrent_jobs: 3,
            heartbeat_interval_rows: 10,
            stall_timeout: Duration::from_secs(10 * 60),
            monitor_interval: Duration::from_secs(60),
            stall_cooldown: Duration::from_secs(5 * 60),
            monitor_shutdown_timeout: Duration::from_secs(5),
            email_regex,
            disposable_domains: to_set(&["mailinator.com", "10minutemail.com", "guerrillamail.com"]),
            role_based_prefixes: to_set(&["info", "support", "admin", "sales", "contact"]),
            free_email_providers: to_set(&[
                "gmail.com",
                "yahoo.com",
                "outlook.com",
                "hotmail.com",
                "aol.com",
                "icloud.com",
                "live.com",
                "msn.com",
            ]),
            loaded_config_path: None,
        }
    }

    /// Upper bound on the wall-clock time of one `probe_with_retry` call when
    /// every attempt runs into its session deadline.
    pub fn max_probe_latency(&self) -> Duration {
        let attempts = self.smtp_retries + 1;
        (self.smtp_timeout + self.retry_backoff + self.retry_jitter) * attempts
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::build_default()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("validator_mode", &self.validator_mode)
            .field("dns_timeout", &self.dns_timeout)
            .field("dns_servers_count", &self.dns_servers.len())
            .field("mx_cache_ttl", &self.mx_cache_ttl)
            .field("smtp_timeout", &self.smtp_timeout)
            .field("smtp_sender_email", &self.smtp_sender_email)
            .field("helo_name", &self.helo_name)
            .field("smtp_retries", &self.smtp_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("retry_jitter", &self.retry_jitter)
            .field("retry_backoff_floor", &self.retry_backoff_floor)
            .field("catch_all_cache_ttl", &self.catch_all_cache_ttl)
            .field("smtp_global_workers", &self.smtp_global_workers)
            .field("smtp_per_domain_limit", &self.smtp_per_domain_limit)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("heartbeat_interval_rows", &self.heartbeat_interval_rows)
            .field("stall_timeout", &self.stall_timeout)
            .field("monitor_interval", &self.monitor_interval)
            .field("stall_cooldown", &self.stall_cooldown)
            .field("monitor_shutdown_timeout", &self.monitor_shutdown_timeout)
            .field("email_regex", &self.email_regex.as_str())
            .field("disposable_domains_count", &self.disposable_domains.len())
            .field("role_based_prefixes_count", &self.role_based_prefixes.len())
            .field("free_email_providers_count", &self.free_email_providers.len())
            .field("loaded_config_path", &self.loaded_config_path)
            .finish()
    }
}

/// Computes the sleep between two SMTP attempts: `retry_backoff` plus a random
/// offset in `[-retry_jitter, +retry_jitter]`, never below `retry_backoff_floor`.
pub fn get_jittered_backoff(config: &Config) -> Duration {
    use rand::Rng;
    let base_ms = config.retry_backoff.as_millis() as i64;
    let jitter_ms = config.retry_jitter.as_millis() as i64;
    let offset = if jitter_ms > 0 {
        rand::thread_rng().gen_range(-jitter_ms..=jitter_ms)
    } else {
        0
    };
    let floor_ms = config.retry_backoff_floor.as_millis() as i64;
    Duration::from_millis((base_ms + offset).max(floor_ms).max(0) as u64)
}
