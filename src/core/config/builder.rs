//! Provides the `ConfigBuilder` for fluent configuration construction.

use super::loading::{apply_file_config, load_config_file};
use super::validation::validate_config;
use super::{Config, ConfigFile, Result, ValidatorMode};
use crate::AppError;
use std::path::Path;
use std::time::Duration;

/// Builder pattern for creating `Config` instances fluently.
///
/// This is the primary way users should create a `Config` object.
/// It handles loading from files, applying overrides, and validation.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    config_file_path: Option<String>,
    overrides: ConfigFile,
}

impl ConfigBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify an optional configuration file path to load.
    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_file_path = Some(path.into());
        self
    }

    pub fn validator_mode(mut self, mode: ValidatorMode) -> Self {
        self.overrides.validator.mode = Some(mode.to_string());
        self
    }
    pub fn dns_timeout(mut self, duration: Duration) -> Self {
        self.overrides.dns.dns_timeout = Some(duration.as_secs());
        self
    }
    pub fn dns_servers(mut self, servers: Vec<String>) -> Self {
        self.overrides.dns.dns_servers = Some(servers);
        self
    }
    pub fn mx_cache_ttl_minutes(mut self, minutes: u64) -> Self {
        self.overrides.dns.mx_cache_ttl_minutes = Some(minutes);
        self
    }
    pub fn smtp_timeout(mut self, duration: Duration) -> Self {
        self.overrides.smtp.smtp_timeout = Some(duration.as_secs());
        self
    }
    pub fn smtp_sender_email(mut self, value: impl Into<String>) -> Self {
        self.overrides.smtp.smtp_sender_email = Some(value.into());
        self
    }
    pub fn helo_name(mut self, value: impl Into<String>) -> Self {
        self.overrides.smtp.helo_name = Some(value.into());
        self
    }
    pub fn smtp_retries(mut self, value: u32) -> Self {
        self.overrides.smtp.retries = Some(value);
        self
    }
    pub fn retry_backoff_ms(mut self, base: u64, jitter: u64) -> Self {
        self.overrides.smtp.retry_backoff_ms = Some(base);
        self.overrides.smtp.retry_jitter_ms = Some(jitter);
        self
    }
    pub fn catch_all_cache_ttl_minutes(mut self, minutes: u64) -> Self {
        self.overrides.smtp.catch_all_cache_ttl_minutes = Some(minutes);
        self
    }
    pub fn smtp_global_workers(mut self, value: usize) -> Self {
        self.overrides.concurrency.smtp_global_workers = Some(value);
        self
    }
    pub fn smtp_per_domain_limit(mut self, value: usize) -> Self {
        self.overrides.concurrency.smtp_per_domain_limit = Some(value);
        self
    }
    pub fn max_concurrent_jobs(mut self, value: usize) -> Self {
        self.overrides.concurrency.max_concurrent_jobs = Some(value);
        self
    }
    pub fn heartbeat_interval_rows(mut self, value: usize) -> Self {
        self.overrides.jobs.heartbeat_interval_rows = Some(value);
        self
    }
    pub fn stall_timeout_minutes(mut self, value: u64) -> Self {
        self.overrides.jobs.stall_timeout_minutes = Some(value);
        self
    }
    pub fn monitor_interval(mut self, duration: Duration) -> Self {
        self.overrides.jobs.monitor_interval_secs = Some(duration.as_secs());
        self
    }

    /// Builds the final `Config` object, applying defaults, file settings, overrides, and validation.
    pub fn build(mut self) -> Result<Config> {
        let mut loaded_path: Option<String> = None;

        if let Some(ref path) = self.config_file_path {
            match load_config_file(path) {
                Ok(file_config) => {
                    apply_file_config(&mut self.config, &file_config)?;
                    loaded_path = Some(path.clone());
                    tracing::info!("Loaded base configuration from specified file: {}", path);
                }
                Err(e) => {
                    tracing::error!("Failed to load specified config file '{}': {}", path, e);
                    return Err(AppError::Config(format!(
                        "Failed to load specified configuration file '{}': {}",
                        path, e
                    )));
                }
            }
        } else {
            tracing::debug!("No config file specified, checking default locations.");
            for path_str in ["./lead-validator.toml", "./config.toml"] {
                if Path::new(path_str).exists() {
                    tracing::debug!("Found potential default config file: {}", path_str);
                    match load_config_file(path_str) {
                        Ok(file_config) => {
                            apply_file_config(&mut self.config, &file_config)?;
                            loaded_path = Some(path_str.to_string());
                            tracing::info!(
                                "Loaded base configuration from default location: {}",
                                path_str
                            );
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to load or parse default config '{}': {}",
                                path_str,
                                e
                            );
                        }
                    }
                }
            }
            if loaded_path.is_none() {
                tracing::info!("No configuration file found. Using default values and overrides.");
            }
        }

        apply_file_config(&mut self.config, &self.overrides)?;
        self.config.loaded_config_path = loaded_path;
        validate_config(&mut self.config)?;

        tracing::debug!("Final configuration built successfully.");
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_take_effect() {
        let config = ConfigBuilder::new()
            .config_file("/nonexistent/never-there.toml")
            .build();
        assert!(config.is_err());

        let config = ConfigBuilder::new()
            .validator_mode(ValidatorMode::Mock)
            .smtp_retries(3)
            .smtp_global_workers(4)
            .smtp_per_domain_limit(1)
            .heartbeat_interval_rows(5)
            .stall_timeout_minutes(2)
            .build()
            .unwrap();
        assert_eq!(config.validator_mode, ValidatorMode::Mock);
        assert_eq!(config.smtp_retries, 3);
        assert_eq!(config.smtp_global_workers, 4);
        assert_eq!(config.smtp_per_domain_limit, 1);
        assert_eq!(config.heartbeat_interval_rows, 5);
        assert_eq!(config.stall_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_job_cap_is_rejected() {
        let result = ConfigBuilder::new().max_concurrent_jobs(50).build();
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
