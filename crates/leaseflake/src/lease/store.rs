use core::{future::Future, time::Duration};

use crate::{Error, Result, lease::WorkerLease};

/// The shared, persistent collection of [`WorkerLease`] rows.
///
/// Any store offering an atomic conditional update per row can back the
/// protocol: a relational table (`UPDATE ... WHERE worker_id = ? AND ...`), a
/// key-value store with compare-and-swap, and so on. Implementations report
/// I/O failures as [`Error::StoreUnavailable`]; callers bound every call with
/// a timeout and retry transient failures.
///
/// All futures must be `Send` so lease maintenance can run on a
/// multi-threaded runtime.
pub trait LeaseStore: Send + Sync {
    /// Returns every row in the pool, in no particular order.
    fn list(&self) -> impl Future<Output = Result<Vec<WorkerLease>>> + Send;

    /// Returns the row for `worker_id`, if it exists.
    fn get(&self, worker_id: u64) -> impl Future<Output = Result<Option<WorkerLease>>> + Send;

    /// Inserts `lease` unless a row with the same worker ID exists. Returns
    /// whether the row was inserted.
    fn insert_if_absent(&self, lease: WorkerLease) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically replaces the row for `expected.worker_id` with `new`, but
    /// only if the stored row still equals `expected`. Returns `false` when
    /// the row changed underneath (a lost race) or does not exist.
    fn compare_and_swap(
        &self,
        expected: &WorkerLease,
        new: WorkerLease,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Runs a store call with an upper bound on its duration. Expiry is reported
/// as [`Error::StoreUnavailable`].
pub(crate) async fn with_timeout<F, O>(limit: Duration, fut: F) -> Result<O>
where
    F: Future<Output = Result<O>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::store(format!("store call timed out after {limit:?}")))?
}
