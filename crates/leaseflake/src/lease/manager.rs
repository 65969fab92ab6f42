use core::future::Future;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Result, SystemClock, TimeSource,
    lease::{HolderIdentity, LeaseConfig, LeaseStore, WorkerLease, with_timeout},
};

/// Claims, renews and releases worker IDs in a shared [`LeaseStore`].
///
/// Every store call is bounded by [`LeaseConfig::store_timeout`], and
/// transient failures are retried up to [`LeaseConfig::max_retries`] times
/// with exponential backoff before escalating.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use leaseflake::{HolderIdentity, LeaseConfig, MemoryLeaseStore, SystemClock, WorkerLeaseManager};
///
/// let config = LeaseConfig { max_worker_id: 3, ..LeaseConfig::default() };
/// let manager = WorkerLeaseManager::new(Arc::new(MemoryLeaseStore::new()), SystemClock, config);
/// manager.seed_pool().await.unwrap();
///
/// let me = HolderIdentity::for_current_process();
/// let worker_id = manager.acquire(&me).await.unwrap();
/// manager.renew(worker_id, &me).await.unwrap();
/// assert!(manager.release(worker_id, &me).await.unwrap());
/// # });
/// ```
#[derive(Debug)]
pub struct WorkerLeaseManager<S, T = SystemClock> {
    store: Arc<S>,
    time: T,
    config: LeaseConfig,
}

impl<S, T> WorkerLeaseManager<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    pub const fn new(store: Arc<S>, time: T, config: LeaseConfig) -> Self {
        Self {
            store,
            time,
            config,
        }
    }

    pub const fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The clock that stamps lease heartbeats.
    pub const fn time(&self) -> &T {
        &self.time
    }

    /// Creates a free row for every worker ID in the pool that does not have
    /// one yet. Safe to call from every process on every start. Returns the
    /// number of rows created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store keeps failing.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn seed_pool(&self) -> Result<u64> {
        let store = &self.store;
        let mut created = 0;
        for worker_id in 0..=self.config.max_worker_id {
            let inserted = self
                .with_retry("seed lease", move || {
                    store.insert_if_absent(WorkerLease::free(worker_id))
                })
                .await?;
            if inserted {
                created += 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(created, pool_size = self.config.pool_size(), "lease pool seeded");
        Ok(created)
    }

    /// Claims the lowest free worker ID for `identity`.
    ///
    /// Shorthand for [`acquire_lease`](Self::acquire_lease) when only the ID
    /// is needed.
    ///
    /// # Errors
    ///
    /// See [`acquire_lease`](Self::acquire_lease).
    pub async fn acquire(&self, identity: &HolderIdentity) -> Result<u64> {
        self.acquire_lease(identity).await.map(|lease| lease.worker_id)
    }

    /// Claims the lowest free worker ID for `identity` and returns the row as
    /// written, heartbeat included.
    ///
    /// Scans the pool once in ascending order and tries a compare-and-swap on
    /// each free row. Losing a race moves on to the next candidate.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerIdExhausted`] if no row could be claimed: the fleet is
    ///   larger than the worker ID space.
    /// - [`Error::StoreUnavailable`] if the store keeps failing. This is fatal
    ///   at startup.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, identity), fields(identity = %identity)))]
    pub async fn acquire_lease(&self, identity: &HolderIdentity) -> Result<WorkerLease> {
        let store = &self.store;
        let mut candidates: Vec<WorkerLease> = self
            .with_retry("list leases", move || store.list())
            .await?
            .into_iter()
            .filter(|lease| lease.is_free() && lease.worker_id <= self.config.max_worker_id)
            .collect();
        candidates.sort_unstable_by_key(|lease| lease.worker_id);

        for candidate in &candidates {
            if let Some(claimed) = self.try_claim(candidate, identity).await? {
                #[cfg(feature = "tracing")]
                tracing::info!(worker_id = claimed.worker_id, "worker lease acquired");
                return Ok(claimed);
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(worker_id = candidate.worker_id, "lost claim race, trying next lease");
        }

        #[cfg(feature = "tracing")]
        tracing::error!(
            pool_size = self.config.pool_size(),
            "no free worker id left in the pool"
        );
        Err(Error::WorkerIdExhausted {
            pool_size: self.config.pool_size(),
        })
    }

    /// Claims one specific worker ID for `identity`.
    ///
    /// Succeeds if the row is free, or already held by `identity`. Used when
    /// the operator pins a worker ID but still wants the pool to record it.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerIdUnavailable`] if the row is held by someone else or
    ///   is not part of the pool.
    /// - [`Error::StoreUnavailable`] if the store keeps failing.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, identity), fields(identity = %identity)))]
    pub async fn claim(&self, worker_id: u64, identity: &HolderIdentity) -> Result<WorkerLease> {
        let store = &self.store;
        let current = if worker_id <= self.config.max_worker_id {
            self.with_retry("read lease", move || store.get(worker_id)).await?
        } else {
            None
        };

        let claimed = match current {
            Some(row) if row.is_held_by(identity) => {
                let renewed_at = self.renew(worker_id, identity).await?;
                Some(row.renewed(renewed_at))
            }
            Some(row) if row.is_free() => self.try_claim(&row, identity).await?,
            _ => None,
        };

        match claimed {
            Some(lease) => {
                #[cfg(feature = "tracing")]
                tracing::info!(worker_id, "pinned worker lease claimed");
                Ok(lease)
            }
            None => Err(Error::WorkerIdUnavailable { worker_id }),
        }
    }

    /// Refreshes the heartbeat of the lease `identity` holds on `worker_id`.
    /// Returns the heartbeat timestamp written, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseLost`] if the row is no longer claimed by
    /// `identity`, or if the store stays unavailable after all retries. In
    /// both cases another process may now own the worker ID, so the caller
    /// must stop generating IDs.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, identity), fields(identity = %identity)))]
    pub async fn renew(&self, worker_id: u64, identity: &HolderIdentity) -> Result<u64> {
        let store = &self.store;
        let time = &self.time;
        let renewed = self
            .with_retry("renew lease", move || async move {
                let current = store
                    .get(worker_id)
                    .await?
                    .filter(|lease| lease.is_held_by(identity))
                    .ok_or(Error::LeaseLost { worker_id })?;

                let now = time.current_millis();
                if store.compare_and_swap(&current, current.renewed(now)).await? {
                    Ok(now)
                } else {
                    // Re-read on the next attempt to tell a reclaim from a
                    // benign concurrent write.
                    Err(Error::store("lease row changed during renewal"))
                }
            })
            .await;

        match renewed {
            Err(e) if e.is_transient() => {
                #[cfg(feature = "tracing")]
                tracing::error!(worker_id, error = %e, "lease renewal exhausted its retries");
                Err(Error::LeaseLost { worker_id })
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(worker_id, error = %e, "worker lease lost");
                Err(e)
            }
            Ok(renewed_at) => Ok(renewed_at),
        }
    }

    /// Frees the lease if `identity` still holds it. Returns whether a row
    /// was freed.
    ///
    /// Best-effort: a process that crashes before calling this is cleaned up
    /// by the [`StaleLeaseReclaimer`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store keeps failing.
    ///
    /// [`StaleLeaseReclaimer`]: crate::StaleLeaseReclaimer
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, identity), fields(identity = %identity)))]
    pub async fn release(&self, worker_id: u64, identity: &HolderIdentity) -> Result<bool> {
        let store = &self.store;
        let released = self
            .with_retry("release lease", move || async move {
                match store.get(worker_id).await? {
                    Some(current) if current.is_held_by(identity) => {
                        store.compare_and_swap(&current, current.released()).await
                    }
                    _ => Ok(false),
                }
            })
            .await?;

        #[cfg(feature = "tracing")]
        {
            if released {
                tracing::info!(worker_id, "worker lease released");
            } else {
                tracing::warn!(worker_id, "lease was no longer held at release");
            }
        }
        Ok(released)
    }

    /// Swaps `candidate` to claimed by `identity`. Returns the written row,
    /// or `None` if another process changed the row first.
    async fn try_claim(
        &self,
        candidate: &WorkerLease,
        identity: &HolderIdentity,
    ) -> Result<Option<WorkerLease>> {
        let store = &self.store;
        let worker_id = candidate.worker_id;
        let claimed = WorkerLease::claimed(worker_id, identity.clone(), self.time.current_millis());
        let attempt = &claimed;

        let won = self
            .with_retry("claim lease", move || {
                store.compare_and_swap(candidate, attempt.clone())
            })
            .await?;

        // A retried swap may have landed on an earlier attempt whose reply
        // was lost, so a failed swap on a row we already hold is a win.
        if won || self.holds(worker_id, identity).await? {
            Ok(Some(claimed))
        } else {
            Ok(None)
        }
    }

    async fn holds(&self, worker_id: u64, identity: &HolderIdentity) -> Result<bool> {
        let store = &self.store;
        let current = self
            .with_retry("read lease", move || store.get(worker_id))
            .await?;
        Ok(current.is_some_and(|lease| lease.is_held_by(identity)))
    }

    /// Runs `call` with the configured timeout, retrying transient failures
    /// with exponential backoff.
    async fn with_retry<F, Fut, O>(&self, _op: &'static str, mut call: F) -> Result<O>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;
        loop {
            match with_timeout(self.config.store_timeout, call()).await {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(op = _op, attempt, error = %e, "retrying store call");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                result => return result,
            }
        }
    }
}
