//! Named leases for background jobs.
//!
//! A lease gives one holder the exclusive right to run a named job until it
//! expires. Acquiring is a single conditional write: it succeeds only if the
//! lease is free, expired, or already held by the same holder.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A granted lease.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage for job leases.
pub trait LeaseStore: Send + Sync {
    /// Take or renew the lease `name` for `holder` until `now + ttl`.
    ///
    /// Returns `None` if another holder owns an unexpired lease.
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<Lease>;

    /// Give the lease up. Returns `false` if `holder` did not hold it.
    fn release(&self, name: &str, holder: &str) -> bool;

    /// The lease currently recorded under `name`, expired or not.
    fn current(&self, name: &str) -> Option<Lease>;
}

/// [`LeaseStore`] kept in a `HashMap` behind a `RwLock`.
///
/// Visible to one process only. That covers every contender for a data
/// directory's jobs, since its journal admits a single process at a time
/// (see [`crate::StoreLock`]).
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<String, Lease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<Lease> {
        let mut leases = self.leases.write().expect("lock poisoned");
        if let Some(existing) = leases.get(name) {
            if existing.holder != holder && !existing.is_expired(now) {
                debug!(lease = name, holder = %existing.holder, "lease busy");
                return None;
            }
        }
        let lease = Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            expires_at: now + ttl,
        };
        leases.insert(name.to_string(), lease.clone());
        Some(lease)
    }

    fn release(&self, name: &str, holder: &str) -> bool {
        let mut leases = self.leases.write().expect("lock poisoned");
        match leases.get(name) {
            Some(existing) if existing.holder == holder => {
                leases.remove(name);
                true
            }
            _ => false,
        }
    }

    fn current(&self, name: &str) -> Option<Lease> {
        self.leases.read().expect("lock poisoned").get(name).cloned()
    }
}
