//! Two-level admission control for outbound SMTP sessions.

use crate::core::error::{AppError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps concurrent SMTP sessions process-wide and per recipient domain.
///
/// Permits are always taken global first, then domain. Per-domain semaphores
/// are created on first use and kept for the life of the governor.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    global: Arc<Semaphore>,
    domains: Mutex<HashMap<String, Arc<Semaphore>>>,
    global_cap: usize,
    per_domain_cap: usize,
}

/// Holds one global and one domain slot. Both are released on drop, on every
/// exit path.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    // Field order matters: the domain slot is released before the global one.
    _domain: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl ConcurrencyGovernor {
    pub fn new(global_cap: usize, per_domain_cap: usize) -> Self {
        let global_cap = global_cap.max(1);
        let per_domain_cap = per_domain_cap.max(1);
        Self {
            global: Arc::new(Semaphore::new(global_cap)),
            domains: Mutex::new(HashMap::new()),
            global_cap,
            per_domain_cap,
        }
    }

    fn domain_semaphore(&self, domain: &str) -> Arc<Semaphore> {
        let key = domain.to_lowercase();
        let mut domains = self.domains.lock();
        domains
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_domain_cap)))
            .clone()
    }

    /// Waits until a global slot and a slot for `domain` are both held.
    pub async fn acquire(&self, domain: &str) -> Result<ConcurrencyPermit> {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Task(format!("Global SMTP semaphore closed: {}", e)))?;

        let domain_sem = self.domain_semaphore(domain);
        let domain_permit = domain_sem
            .acquire_owned()
            .await
            .map_err(|e| AppError::Task(format!("Domain SMTP semaphore closed: {}", e)))?;

        tracing::trace!(target: "governor",
            "Acquired SMTP slot for {} ({} global slots left)",
            domain, self.global.available_permits()
        );
        Ok(ConcurrencyPermit {
            _domain: domain_permit,
            _global: global,
        })
    }

    pub fn global_cap(&self) -> usize {
        self.global_cap
    }

    pub fn per_domain_cap(&self) -> usize {
        self.per_domain_cap
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Number of distinct domains that have been probed so far.
    pub fn tracked_domains(&self) -> usize {
        self.domains.lock().len()
    }
}
