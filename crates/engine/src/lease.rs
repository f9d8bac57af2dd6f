//! Externally leased resources (e.g. provisioned inference capacity).
//!
//! A lease has a TTL that must outlive the gap between invocations. The
//! coordinator extends it after every unfinished invocation and lets it lapse
//! once the episode completes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Default TTL granted on each extension.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease backend error: {0}")]
    Backend(String),
}

pub trait Lease: Send + Sync {
    fn extend(&self, ttl: Duration) -> Result<(), LeaseError>;
}

impl<L: Lease + ?Sized> Lease for Arc<L> {
    fn extend(&self, ttl: Duration) -> Result<(), LeaseError> {
        (**self).extend(ttl)
    }
}

/// No leased resource attached to the job.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLease;

impl Lease for NoLease {
    fn extend(&self, _ttl: Duration) -> Result<(), LeaseError> {
        Ok(())
    }
}

/// Records every extension. Can be told to fail.
#[derive(Debug, Default)]
pub struct InMemoryLease {
    extensions: Mutex<Vec<Duration>>,
    failing: bool,
}

impl InMemoryLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            extensions: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn extensions(&self) -> Vec<Duration> {
        self.extensions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Lease for InMemoryLease {
    fn extend(&self, ttl: Duration) -> Result<(), LeaseError> {
        if self.failing {
            return Err(LeaseError::Backend("lease backend unavailable".to_string()));
        }
        let mut guard = self
            .extensions
            .lock()
            .map_err(|_| LeaseError::Backend("lease lock poisoned".to_string()))?;
        guard.push(ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_lease_records_extensions() {
        let lease = InMemoryLease::new();
        lease.extend(DEFAULT_LEASE_TTL).unwrap();
        lease.extend(Duration::from_secs(5)).unwrap();
        assert_eq!(lease.extensions(), vec![DEFAULT_LEASE_TTL, Duration::from_secs(5)]);
    }

    #[test]
    fn failing_lease_reports_backend_error() {
        let lease = Arc::new(InMemoryLease::failing());
        assert!(matches!(
            lease.extend(DEFAULT_LEASE_TTL),
            Err(LeaseError::Backend(_))
        ));
        assert!(lease.extensions().is_empty());
    }
}
