//! The per-address verification pipeline.

use crate::core::config::{Config, ValidatorMode};
use crate::core::error::Result;
use crate::core::models::{Address, ReasonCode, RiskFactor, VerificationOutcome};
use crate::core::scoring::ScoringEngine;
use crate::utils::cache::{CatchAllCache, MxCache};
use crate::utils::dns::{MxLookupOutcome, MxResolver, TrustDnsMxResolver};
use crate::utils::governor::ConcurrencyGovernor;
use crate::utils::smtp::{LettreRcptProbe, RcptProbe, SmtpProbe};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

const MOCK_VALID_DOMAINS: [&str; 3] = ["example.com", "example.org", "test.com"];
const MOCK_ROLE_BASED_SCORE: u8 = 75;

/// Verifies single addresses. Owns the shared caches and the concurrency
/// governor, so one instance should serve every job in the process.
#[derive(Clone)]
pub struct EmailVerifier {
    config: Arc<Config>,
    resolver: Arc<dyn MxResolver>,
    probe: SmtpProbe,
    mx_cache: Arc<MxCache>,
    catch_all_cache: Arc<CatchAllCache>,
    governor: Arc<ConcurrencyGovernor>,
    scoring: ScoringEngine,
}

impl EmailVerifier {
    /// Builds a verifier around the given network seams, with fresh caches
    /// and a governor sized from `config`.
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<dyn MxResolver>,
        transport: Arc<dyn RcptProbe>,
    ) -> Self {
        let mx_cache = Arc::new(MxCache::new(config.mx_cache_ttl));
        let catch_all_cache = Arc::new(CatchAllCache::new(config.catch_all_cache_ttl));
        let governor = Arc::new(ConcurrencyGovernor::new(
            config.smtp_global_workers,
            config.smtp_per_domain_limit,
        ));
        let scoring = ScoringEngine::new(config.free_email_providers.clone());
        let probe = SmtpProbe::new(transport, config.clone());
        Self {
            config,
            resolver,
            probe,
            mx_cache,
            catch_all_cache,
            governor,
            scoring,
        }
    }

    /// Verifier wired to live DNS and SMTP.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let resolver = Arc::new(TrustDnsMxResolver::from_config(&config)?);
        let transport = Arc::new(LettreRcptProbe::new(&config));
        tracing::debug!(target: "verify_task", "DNS resolver and SMTP transport initialized.");
        Ok(Self::new(config, resolver, transport))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mx_cache(&self) -> &MxCache {
        &self.mx_cache
    }

    pub fn catch_all_cache(&self) -> &CatchAllCache {
        &self.catch_all_cache
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Verifies one already-extracted address. Never fails: every problem is
    /// expressed as a reason code on the returned outcome.
    pub async fn verify(&self, email: &str) -> VerificationOutcome {
        let started = Instant::now();
        let email = email.trim();
        let outcome = if email.is_empty() {
            self.scoring.outcome(ReasonCode::EmptyEmail, "")
        } else {
            match self.config.validator_mode {
                ValidatorMode::Mock => self.verify_mock(email),
                ValidatorMode::Real => self.verify_real(email).await,
            }
        };
        tracing::info!(target: "verify_task",
            email = %email,
            status = %outcome.status,
            reason = %outcome.reason,
            failure_class = ?outcome.reason.failure_class(),
            score = outcome.score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Verification finished"
        );
        outcome
    }

    /// Syntax, disposable and role checks shared by both modes.
    fn precheck(&self, email: &str) -> std::result::Result<Address, VerificationOutcome> {
        let address = match Address::parse(email) {
            Some(addr) if self.config.email_regex.is_match(email) => addr,
            _ => {
                let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
                return Err(self.scoring.outcome(ReasonCode::BadSyntax, domain));
            }
        };
        if self.config.disposable_domains.contains(address.domain()) {
            return Err(self
                .scoring
                .outcome(ReasonCode::DisposableDomain, address.domain()));
        }
        if self
            .config
            .role_based_prefixes
            .contains(&address.local().to_lowercase())
        {
            return Err(self.scoring.outcome(ReasonCode::RoleBased, address.domain()));
        }
        Ok(address)
    }

    fn verify_mock(&self, email: &str) -> VerificationOutcome {
        let address = match self.precheck(email) {
            Ok(addr) => addr,
            // Role accounts get a flat score in mock runs, free provider or not.
            Err(outcome) if outcome.reason == ReasonCode::RoleBased => {
                return VerificationOutcome {
                    status: outcome.status,
                    reason: ReasonCode::RoleBased,
                    score: MOCK_ROLE_BASED_SCORE,
                    risk_factors: BTreeSet::from([RiskFactor::RoleBasedEmail]),
                };
            }
            Err(outcome) => return outcome,
        };
        let domain = address.domain();
        let reason = if MOCK_VALID_DOMAINS.contains(&domain)
            || domain.ends_with(".edu")
            || domain.ends_with(".gov")
            || self.scoring.is_free_provider(domain)
        {
            ReasonCode::MockValid
        } else {
            ReasonCode::MockRisky
        };
        self.scoring.outcome(reason, domain)
    }

    async fn verify_real(&self, email: &str) -> VerificationOutcome {
        let address = match self.precheck(email) {
            Ok(addr) => addr,
            Err(outcome) => return outcome,
        };
        let domain = address.domain();

        let mx_hosts = match self.resolve_mx(domain).await {
            Ok(hosts) => hosts,
            Err(reason) => return self.scoring.outcome(reason, domain),
        };
        let mx_host = &mx_hosts[0];

        if self.catch_all_cache.get(domain) == Some(true) {
            tracing::debug!(target: "verify_task", "Domain {} is a cached catch-all", domain);
            return self.scoring.outcome(ReasonCode::DomainAcceptsAll, domain);
        }

        let _permit = match self.governor.acquire(domain).await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(target: "verify_task", "Could not acquire SMTP slot for {}: {}", domain, e);
                return self.scoring.outcome(ReasonCode::Unclassified, domain);
            }
        };

        let is_catch_all = match self.catch_all_cache.get(domain) {
            Some(cached) => cached,
            None => {
                let detected = self.probe.probe_catch_all(domain, mx_host).await;
                self.catch_all_cache.set(domain, detected);
                detected
            }
        };
        if is_catch_all {
            return self.scoring.outcome(ReasonCode::DomainAcceptsAll, domain);
        }

        // Backoff between attempts runs while the slot is still held.
        let result = self
            .probe
            .probe_with_retry(&address.to_string(), mx_host)
            .await;
        let reason = result.to_reason(self.config.smtp_retries > 0);
        self.scoring.outcome(reason, domain)
    }

    /// Returns MX hosts in preference order, or the reason the domain cannot
    /// receive mail.
    async fn resolve_mx(&self, domain: &str) -> std::result::Result<Vec<String>, ReasonCode> {
        if let Some(hosts) = self.mx_cache.get(domain) {
            tracing::debug!(target: "dns_task", "MX cache hit for {}", domain);
            return if hosts.is_empty() {
                Err(ReasonCode::NoMx)
            } else {
                Ok(hosts)
            };
        }

        match self.resolver.lookup_mx(domain).await {
            MxLookupOutcome::Hosts(hosts) if !hosts.is_empty() => {
                self.mx_cache.set(domain, hosts.clone());
                Ok(hosts)
            }
            MxLookupOutcome::Hosts(_) | MxLookupOutcome::NoRecords => {
                self.mx_cache.set_negative(domain);
                Err(ReasonCode::NoMx)
            }
            MxLookupOutcome::Timeout => Err(ReasonCode::NoMxDnsTimeout),
            MxLookupOutcome::Failed(detail) => {
                tracing::warn!(target: "dns_task", "MX lookup failure for {} not cached: {}", domain, detail);
                Err(ReasonCode::NoMx)
            }
        }
    }
}
