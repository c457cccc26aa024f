//! Defines the custom error types for the lead-validator application.
//!
//! Verification failures (bad syntax, unreachable mail servers, rejected
//! recipients) are *not* errors: they are encoded as a [`ReasonCode`] inside a
//! [`VerificationOutcome`]. `AppError` is reserved for configuration,
//! initialization, job-store and scheduling failures.
//!
//! [`ReasonCode`]: crate::core::models::ReasonCode
//! [`VerificationOutcome`]: crate::core::models::VerificationOutcome

use std::io;
use thiserror::Error;

/// The primary error type for the verification engine and job orchestration.
#[derive(Error, Debug)]
pub enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error initializing necessary components (e.g., resolvers, runtimes).
    #[error("Initialization Error: {0}")]
    Initialization(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error during SMTP communication setup or command execution.
    #[error("SMTP Error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// SMTP connectivity could not be established or confirmed.
    #[error("SMTP Inconclusive: {0}")]
    SmtpInconclusive(String),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// The durable job store could not be reached or rejected the operation.
    #[error("Job Store Error: {0}")]
    Store(String),

    /// No job with the given identifier exists in the store.
    #[error("Job Not Found: {0}")]
    JobNotFound(String),

    /// Admission control refused a new job.
    #[error("Maximum {max_allowed} concurrent jobs allowed. Currently running: {running}")]
    TooManyConcurrentJobs {
        /// Jobs currently in the `running` state.
        running: usize,
        /// Configured admission cap.
        max_allowed: usize,
    },

    /// A status change was requested on a job that has already reached a terminal state.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status of the job.
        from: String,
        /// Requested status.
        to: String,
    },
}

pub type Result<T> = std::result::Result<T, AppError>;
