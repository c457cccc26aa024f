//! Defines the structure mirroring the TOML configuration file format.

use serde::Deserialize;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub(crate) dns: DnsConfig,
    #[serde(default)]
    pub(crate) smtp: SmtpConfig,
    #[serde(default)]
    pub(crate) concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub(crate) jobs: JobsConfig,
    #[serde(default)]
    pub(crate) policy: PolicyConfig,
    #[serde(default)]
    pub(crate) validator: ValidatorConfig,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct DnsConfig {
    pub(crate) dns_timeout: Option<u64>,
    pub(crate) dns_servers: Option<Vec<String>>,
    pub(crate) mx_cache_ttl_minutes: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct SmtpConfig {
    pub(crate) smtp_timeout: Option<u64>,
    pub(crate) smtp_sender_email: Option<String>,
    pub(crate) helo_name: Option<String>,
    pub(crate) retries: Option<u32>,
    pub(crate) retry_backoff_ms: Option<u64>,
    pub(crate) retry_jitter_ms: Option<u64>,
    pub(crate) retry_backoff_floor_ms: Option<u64>,
    pub(crate) catch_all_cache_ttl_minutes: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConcurrencyConfig {
    pub(crate) smtp_global_workers: Option<usize>,
    pub(crate) smtp_per_domain_limit: Option<usize>,
    pub(crate) max_concurrent_jobs: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct JobsConfig {
    pub(crate) heartbeat_interval_rows: Option<usize>,
    pub(crate) stall_timeout_minutes: Option<u64>,
    pub(crate) monitor_interval_secs: Option<u64>,
    pub(crate) stall_cooldown_secs: Option<u64>,
    pub(crate) monitor_shutdown_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct PolicyConfig {
    pub(crate) disposable_domains: Option<Vec<String>>,
    pub(crate) role_based_prefixes: Option<Vec<String>>,
    pub(crate) free_email_providers: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ValidatorConfig {
    pub(crate) mode: Option<String>,
}
