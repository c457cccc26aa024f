//! Maps lettre SMTP errors onto typed probe results.

use super::result::{ProbeDetail, ProbeResult};
use lettre::transport::smtp::response::Code;
use lettre::transport::smtp::Error as SmtpError;
use std::error::Error as StdError;
use std::io;

pub(crate) fn code_value(code: Code) -> Option<u16> {
    code.to_string().parse::<u16>().ok()
}

fn find_io_error<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        current = err.source();
    }
    None
}

/// Classifies a socket-level failure.
pub(crate) fn classify_io_error(error: &io::Error) -> ProbeResult {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeResult::timeout(),
        io::ErrorKind::ConnectionRefused => ProbeResult::failed(ProbeDetail::ConnectionRefused),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ProbeResult::failed(ProbeDetail::ConnectionReset),
        kind => ProbeResult::failed(ProbeDetail::Other(format!("os_error_{:?}", kind))),
    }
}

/// Interprets a `lettre::transport::smtp::Error` raised during the RCPT stage.
///
/// Negative SMTP replies come back from lettre as errors; those keep their
/// reply code so the retry policy can look at it.
pub(crate) fn classify_smtp_error(error: &SmtpError, server: &str) -> ProbeResult {
    if let Some(code) = error.status().and_then(code_value) {
        tracing::debug!(target: "smtp_task", "SMTP server {} replied {}: {}", server, code, error);
        return ProbeResult::responded(code, error.to_string());
    }

    if error.is_timeout() {
        tracing::warn!(target: "smtp_task", "SMTP session with {} timed out: {}", server, error);
        return ProbeResult::timeout();
    }

    if let Some(io_err) = find_io_error(error) {
        let result = classify_io_error(io_err);
        tracing::warn!(target: "smtp_task",
            "SMTP transport failure talking to {}: {} ({})", server, error, result.detail);
        return result;
    }

    let err_string = error.to_string().to_lowercase();
    if err_string.contains("timed out") {
        return ProbeResult::timeout();
    }
    if err_string.contains("connection refused") {
        tracing::error!(target: "smtp_task",
            "SMTP connection refused by {}. Port 25 may be blocked.", server);
        return ProbeResult::failed(ProbeDetail::ConnectionRefused);
    }
    if err_string.contains("connection reset") {
        return ProbeResult::failed(ProbeDetail::ConnectionReset);
    }

    tracing::error!(target: "smtp_task", "Unhandled SMTP error for {}: {}", server, error);
    ProbeResult::failed(ProbeDetail::Other("smtp_exception".to_string()))
}
