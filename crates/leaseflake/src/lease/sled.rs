use std::path::Path;

use crate::{
    Error, Result,
    lease::{LeaseStore, WorkerLease},
};

/// Name of the tree holding the pool.
pub const LEASE_TREE: &str = "worker_leases";

/// A [`LeaseStore`] persisted in a [`sled`] database.
///
/// Each row is stored under its big-endian worker ID, as JSON. Conditional
/// updates map directly onto [`sled::Tree::compare_and_swap`], and every
/// successful write is flushed before it is acknowledged.
///
/// sled holds an exclusive lock on its directory, so one database serves the
/// generators of a single host process; fleets spanning several processes
/// need a networked [`LeaseStore`].
#[derive(Clone, Debug)]
pub struct SledLeaseStore {
    tree: sled::Tree,
}

impl SledLeaseStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(&sled::open(path).map_err(Error::store)?)
    }

    /// Opens a database that is deleted when the last handle drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be created.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(Error::store)?;
        Self::from_db(&db)
    }

    /// Uses the [`LEASE_TREE`] tree of an already open database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the tree cannot be opened.
    pub fn from_db(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(LEASE_TREE).map_err(Error::store)?,
        })
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush().map_err(Error::store)?;
        Ok(())
    }
}

const fn key(worker_id: u64) -> [u8; 8] {
    worker_id.to_be_bytes()
}

fn encode(lease: &WorkerLease) -> Result<Vec<u8>> {
    serde_json::to_vec(lease).map_err(Error::store)
}

fn decode(bytes: &[u8]) -> Result<WorkerLease> {
    serde_json::from_slice(bytes).map_err(|e| Error::store(format!("corrupt lease row: {e}")))
}

impl LeaseStore for SledLeaseStore {
    async fn list(&self) -> Result<Vec<WorkerLease>> {
        self.tree
            .iter()
            .values()
            .map(|value| decode(&value.map_err(Error::store)?))
            .collect()
    }

    async fn get(&self, worker_id: u64) -> Result<Option<WorkerLease>> {
        self.tree
            .get(key(worker_id))
            .map_err(Error::store)?
            .map(|value| decode(&value))
            .transpose()
    }

    async fn insert_if_absent(&self, lease: WorkerLease) -> Result<bool> {
        let swapped = self
            .tree
            .compare_and_swap(key(lease.worker_id), None::<&[u8]>, Some(encode(&lease)?))
            .map_err(Error::store)?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    async fn compare_and_swap(&self, expected: &WorkerLease, new: WorkerLease) -> Result<bool> {
        debug_assert_eq!(expected.worker_id, new.worker_id);
        let swapped = self
            .tree
            .compare_and_swap(
                key(expected.worker_id),
                Some(encode(expected)?),
                Some(encode(&new)?),
            )
            .map_err(Error::store)?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseState;

    #[tokio::test]
    async fn rows_round_trip_through_the_tree() {
        let store = SledLeaseStore::temporary().unwrap();
        for worker_id in [2, 0, 1] {
            assert!(store.insert_if_absent(WorkerLease::free(worker_id)).await.unwrap());
        }
        assert!(!store.insert_if_absent(WorkerLease::free(1)).await.unwrap());

        let ids: Vec<u64> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|lease| lease.worker_id)
            .collect();
        // big-endian keys iterate in numeric order
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn compare_and_swap_detects_lost_races() {
        let store = SledLeaseStore::temporary().unwrap();
        store.insert_if_absent(WorkerLease::free(7)).await.unwrap();

        let free = WorkerLease::free(7);
        let mine = WorkerLease::claimed(7, "me".into(), 1_000);
        assert!(store.compare_and_swap(&free, mine.clone()).await.unwrap());
        assert!(
            !store
                .compare_and_swap(&free, WorkerLease::claimed(7, "them".into(), 1_001))
                .await
                .unwrap()
        );

        let stored = store.get(7).await.unwrap().unwrap();
        assert_eq!(stored, mine);
        assert_eq!(stored.state, LeaseState::Claimed);

        assert!(
            store
                .compare_and_swap(&mine, mine.released())
                .await
                .unwrap()
        );
        assert!(store.get(7).await.unwrap().unwrap().is_free());
    }

    #[tokio::test]
    async fn missing_rows_never_swap() {
        let store = SledLeaseStore::temporary().unwrap();
        assert!(
            !store
                .compare_and_swap(&WorkerLease::free(1), WorkerLease::free(1))
                .await
                .unwrap()
        );
        assert_eq!(store.get(1).await.unwrap(), None);
    }
}
