use std::collections::BTreeMap;

use crate::{
    Result,
    generator::{Mutex, MutexGuard},
    lease::{LeaseStore, WorkerLease},
};

/// An in-process [`LeaseStore`].
///
/// Rows live in a `BTreeMap` behind a mutex, which makes every operation
/// trivially atomic. Useful for tests and for embedding several generators in
/// one process; it offers no protection across processes.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<BTreeMap<u64, WorkerLease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if the map lock was poisoned (std
    /// mutex only).
    ///
    /// [`Error::LockPoisoned`]: crate::Error::LockPoisoned
    pub fn len(&self) -> Result<usize> {
        Ok(self.leases()?.len())
    }

    /// Whether the pool has no rows.
    ///
    /// # Errors
    ///
    /// See [`Self::len`].
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.leases()?.is_empty())
    }

    fn leases(&self) -> Result<MutexGuard<'_, BTreeMap<u64, WorkerLease>>> {
        #[cfg(feature = "parking-lot")]
        {
            Ok(self.leases.lock())
        }
        #[cfg(not(feature = "parking-lot"))]
        {
            Ok(self.leases.lock()?)
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    async fn list(&self) -> Result<Vec<WorkerLease>> {
        Ok(self.leases()?.values().cloned().collect())
    }

    async fn get(&self, worker_id: u64) -> Result<Option<WorkerLease>> {
        Ok(self.leases()?.get(&worker_id).cloned())
    }

    async fn insert_if_absent(&self, lease: WorkerLease) -> Result<bool> {
        let mut leases = self.leases()?;
        if leases.contains_key(&lease.worker_id) {
            return Ok(false);
        }
        leases.insert(lease.worker_id, lease);
        Ok(true)
    }

    async fn compare_and_swap(&self, expected: &WorkerLease, new: WorkerLease) -> Result<bool> {
        debug_assert_eq!(expected.worker_id, new.worker_id);
        let mut leases = self.leases()?;
        match leases.get_mut(&expected.worker_id) {
            Some(current) if current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
