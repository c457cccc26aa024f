//! Defines the result type for SMTP probe operations.

use crate::core::models::ReasonCode;
use std::fmt;

/// What happened on the wire during one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeDetail {
    /// The server answered RCPT TO; carries the reply text.
    Responded(String),
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    /// Any other failure before a RCPT reply was read.
    Other(String),
}

impl fmt::Display for ProbeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeDetail::Responded(message) => write!(f, "{}", message),
            ProbeDetail::Timeout => write!(f, "timeout"),
            ProbeDetail::ConnectionRefused => write!(f, "connection_refused"),
            ProbeDetail::ConnectionReset => write!(f, "connection_reset"),
            ProbeDetail::Other(detail) => write!(f, "{}", detail),
        }
    }
}

/// Outcome of an SMTP probe. Failures are values here, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// RCPT TO reply code, `None` if the session failed before a reply was read.
    pub code: Option<u16>,
    pub detail: ProbeDetail,
}

const TRANSIENT_CODES: [u16; 4] = [421, 450, 451, 452];

impl ProbeResult {
    pub fn responded(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            detail: ProbeDetail::Responded(message.into()),
        }
    }

    pub fn failed(detail: ProbeDetail) -> Self {
        Self { code: None, detail }
    }

    pub fn timeout() -> Self {
        Self::failed(ProbeDetail::Timeout)
    }

    pub fn is_accepted(&self) -> bool {
        self.code == Some(250)
    }

    /// 550-554: the mailbox is rejected and retrying will not change that.
    pub fn is_hard_reject(&self) -> bool {
        matches!(self.code, Some(550..=554))
    }

    /// Transport failures and the 4xx codes worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self.code {
            None => true,
            Some(code) => TRANSIENT_CODES.contains(&code),
        }
    }

    /// Maps the final result of a retried probe to a reason code.
    /// `retries_enabled` selects the `_after_retry` flavours.
    pub fn to_reason(&self, retries_enabled: bool) -> ReasonCode {
        match self.code {
            Some(250) => ReasonCode::SmtpOk,
            Some(code @ 550..=554) => ReasonCode::SmtpReject(code),
            Some(code) if TRANSIENT_CODES.contains(&code) => ReasonCode::TempFail {
                code,
                after_retry: retries_enabled,
            },
            Some(code) => ReasonCode::SmtpCode(code),
            None => match &self.detail {
                ProbeDetail::Timeout if retries_enabled => ReasonCode::TimeoutAfterRetry,
                ProbeDetail::Timeout => ReasonCode::SmtpTimeout,
                ProbeDetail::ConnectionRefused => ReasonCode::ConnectionRefused,
                ProbeDetail::ConnectionReset => ReasonCode::ConnectionReset,
                ProbeDetail::Other(detail) => ReasonCode::ConnectionError(detail.clone()),
                ProbeDetail::Responded(_) => ReasonCode::Unclassified,
            },
        }
    }
}
