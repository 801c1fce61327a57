//! Single-run-per-system exclusion
//!
//! A second run against a managed system could observe a half-applied plan
//! of the first one and compute a wrong diff, so runs take a per-system lock
//! for their whole duration.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Process-wide table of managed systems with a run in progress
#[derive(Debug, Default)]
pub struct SystemLocks {
    held: DashMap<String, DateTime<Utc>>,
}

impl SystemLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lock of a managed system, failing if a run holds it
    pub fn try_acquire(self: &Arc<Self>, managed_system: &str) -> Result<RunGuard> {
        match self.held.entry(managed_system.to_string()) {
            Entry::Occupied(held) => {
                debug!(
                    managed_system,
                    since = %held.get(),
                    "Run already in progress"
                );
                Err(Error::RunInProgress {
                    managed_system: managed_system.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(RunGuard {
                    locks: Arc::clone(self),
                    managed_system: managed_system.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, managed_system: &str) -> bool {
        self.held.contains_key(managed_system)
    }
}

/// Releases the managed system when dropped
#[derive(Debug)]
pub struct RunGuard {
    locks: Arc<SystemLocks>,
    managed_system: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.managed_system);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let locks = SystemLocks::new();

        let guard = locks.try_acquire("P980-A").unwrap();
        assert!(locks.is_held("P980-A"));
        assert_matches!(
            locks.try_acquire("P980-A"),
            Err(Error::RunInProgress { .. })
        );

        // Other systems are independent
        let other = locks.try_acquire("P980-B").unwrap();

        drop(guard);
        assert!(!locks.is_held("P980-A"));
        assert!(locks.try_acquire("P980-A").is_ok());
        drop(other);
    }
}
