//! Converts a verification reason into a confidence score and risk tags.

use crate::core::models::{ReasonCode, RiskFactor, VerificationOutcome};
use std::collections::{BTreeSet, HashSet};

/// Deterministic scorer. Holds only the free-mail provider set it needs to
/// apply the provider penalty.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    free_email_providers: HashSet<String>,
}

impl ScoringEngine {
    const MOCK_VALID_PENALTY: i32 = 5;
    const FREE_PROVIDER_PENALTY: i32 = 5;

    pub fn new(free_email_providers: HashSet<String>) -> Self {
        Self {
            free_email_providers,
        }
    }

    pub fn is_free_provider(&self, domain: &str) -> bool {
        self.free_email_providers.contains(&domain.to_lowercase())
    }

    /// Scores `reason` for an address at `domain`.
    pub fn score(&self, reason: &ReasonCode, domain: &str) -> (u8, BTreeSet<RiskFactor>) {
        let mut factors = BTreeSet::new();

        let hard_zero = match reason {
            ReasonCode::BadSyntax => Some(RiskFactor::InvalidSyntax),
            ReasonCode::EmptyEmail => Some(RiskFactor::EmptyEmail),
            ReasonCode::DisposableDomain => Some(RiskFactor::DisposableProvider),
            ReasonCode::NoMx | ReasonCode::NoMxDnsTimeout => Some(RiskFactor::NoMailServer),
            ReasonCode::SmtpReject(_) => Some(RiskFactor::MailboxNotFound),
            _ => None,
        };
        if let Some(tag) = hard_zero {
            factors.insert(tag);
            return (0, factors);
        }

        let mut score: i32 = 100;
        let mut deduct = |points: i32, tag: Option<RiskFactor>| {
            score -= points;
            if let Some(tag) = tag {
                factors.insert(tag);
            }
        };

        match reason {
            ReasonCode::RoleBased => deduct(25, Some(RiskFactor::RoleBasedEmail)),
            ReasonCode::SmtpTimeout | ReasonCode::TimeoutAfterRetry => {
                deduct(25, Some(RiskFactor::SmtpUnreachable))
            }
            ReasonCode::ConnectionRefused | ReasonCode::ConnectionReset => {
                deduct(30, Some(RiskFactor::SmtpConnectionFailed))
            }
            ReasonCode::TempFail { .. } => deduct(25, Some(RiskFactor::TemporarySmtpFailure)),
            ReasonCode::ConnectionError(_) | ReasonCode::SmtpCode(_) | ReasonCode::Unclassified => {
                deduct(30, Some(RiskFactor::SmtpError))
            }
            ReasonCode::DomainAcceptsAll => deduct(15, Some(RiskFactor::CatchAllDomain)),
            ReasonCode::MockRisky => deduct(40, Some(RiskFactor::UnverifiableDomain)),
            ReasonCode::MockValid if !self.is_free_provider(domain) => {
                deduct(Self::MOCK_VALID_PENALTY, None)
            }
            _ => {}
        }

        if self.is_free_provider(domain) {
            deduct(Self::FREE_PROVIDER_PENALTY, Some(RiskFactor::FreeEmailProvider));
        }

        (score.clamp(0, 100) as u8, factors)
    }

    /// Builds the final outcome for `reason`, taking the status from the reason itself.
    pub fn outcome(&self, reason: ReasonCode, domain: &str) -> VerificationOutcome {
        let (score, risk_factors) = self.score(&reason, domain);
        VerificationOutcome {
            status: reason.status(),
            reason,
            score,
            risk_factors,
        }
    }
}
