pub mod client;
pub(crate) mod error;
pub mod result;

pub use client::{test_smtp_connectivity, LettreRcptProbe, RcptProbe, SmtpProbe};
pub use result::{ProbeDetail, ProbeResult};
