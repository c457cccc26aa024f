//! MX resolution behind a trait so the verifier can run against scripted DNS.

use crate::core::config::Config;
use crate::core::error::{AppError, Result};

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Result of one MX query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MxLookupOutcome {
    /// Exchange host names, lowest preference first. Never empty.
    Hosts(Vec<String>),
    /// NXDOMAIN or an empty answer. Stable, safe to cache.
    NoRecords,
    /// The resolver gave up waiting. Transient, never cached.
    Timeout,
    /// Any other resolver failure.
    Failed(String),
}

#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn lookup_mx(&self, domain: &str) -> MxLookupOutcome;
}

/// Builds the tokio resolver from the configured servers and timeout.
/// Falls back to the system configuration when no server parses.
pub fn create_resolver(config: &Config) -> Result<TokioAsyncResolver> {
    let mut opts = ResolverOpts::default();
    opts.timeout = config.dns_timeout;
    opts.attempts = 1;

    let ips: Vec<IpAddr> = config
        .dns_servers
        .iter()
        .filter_map(|server| match server.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(target: "dns_task", "Ignoring unparseable DNS server '{}'", server);
                None
            }
        })
        .collect();

    if ips.is_empty() {
        tracing::info!(target: "dns_task", "Using system DNS configuration.");
        let (system_config, mut system_opts) =
            trust_dns_resolver::system_conf::read_system_conf().map_err(|e| {
                AppError::Initialization(format!("Failed to read system DNS config: {}", e))
            })?;
        system_opts.timeout = config.dns_timeout;
        system_opts.attempts = 1;
        return Ok(TokioAsyncResolver::tokio(system_config, system_opts));
    }

    let group = NameServerConfigGroup::from_ips_clear(&ips, 53, true);
    let resolver_config = ResolverConfig::from_parts(None, vec![], group);
    tracing::debug!(target: "dns_task", "DNS resolver using {} name servers", ips.len());
    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}

/// [`MxResolver`] backed by trust-dns.
#[derive(Clone)]
pub struct TrustDnsMxResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl TrustDnsMxResolver {
    pub fn new(resolver: TokioAsyncResolver, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(create_resolver(config)?, config.dns_timeout))
    }
}

#[async_trait]
impl MxResolver for TrustDnsMxResolver {
    async fn lookup_mx(&self, domain: &str) -> MxLookupOutcome {
        tracing::debug!(target: "dns_task", "Looking up MX records for {}", domain);
        let lookup = match tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(target: "dns_task", "MX lookup for {} timed out after {:?}", domain, self.timeout);
                return MxLookupOutcome::Timeout;
            }
        };

        match lookup {
            Ok(answer) => {
                let mut records: Vec<(u16, String)> = answer
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        (mx.preference(), host.trim_end_matches('.').to_string())
                    })
                    .filter(|(_, host)| !host.is_empty())
                    .collect();
                records.sort_by_key(|(preference, _)| *preference);
                let hosts: Vec<String> = records.into_iter().map(|(_, host)| host).collect();
                if hosts.is_empty() {
                    MxLookupOutcome::NoRecords
                } else {
                    tracing::debug!(target: "dns_task", "MX for {}: {:?}", domain, hosts);
                    MxLookupOutcome::Hosts(hosts)
                }
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    tracing::debug!(target: "dns_task", "No MX records for {}", domain);
                    MxLookupOutcome::NoRecords
                }
                ResolveErrorKind::Timeout => {
                    tracing::warn!(target: "dns_task", "Resolver timeout for {}", domain);
                    MxLookupOutcome::Timeout
                }
                _ => {
                    tracing::warn!(target: "dns_task", "MX lookup for {} failed: {}", domain, e);
                    MxLookupOutcome::Failed(e.to_string())
                }
            },
        }
    }
}
