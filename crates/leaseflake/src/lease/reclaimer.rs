use core::time::Duration;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Result, SystemClock, TimeSource,
    lease::{DEFAULT_STORE_TIMEOUT, LeaseStore, with_timeout},
};

/// Outcome of one [`StaleLeaseReclaimer::reclaim_stale`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Rows inspected.
    pub scanned: usize,
    /// Worker IDs freed by this pass, ascending.
    pub reclaimed: Vec<u64>,
    /// Stale rows that changed before they could be freed, typically a late
    /// renewal or another reclaimer getting there first.
    pub skipped: usize,
}

/// Frees leases whose holder stopped heartbeating.
///
/// Runs on demand; schedule it from outside (a timer, a cron job) at an
/// interval of your choosing. Any number of reclaimers may run concurrently:
/// every transition is a compare-and-swap against the row that was judged
/// stale, so a renewal that lands in between always wins.
///
/// The threshold should be several heartbeat intervals long, see
/// [`LeaseConfig::validate`].
///
/// [`LeaseConfig::validate`]: crate::LeaseConfig::validate
#[derive(Debug)]
pub struct StaleLeaseReclaimer<S, T = SystemClock> {
    store: Arc<S>,
    time: T,
    store_timeout: Duration,
}

impl<S, T> StaleLeaseReclaimer<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    pub const fn new(store: Arc<S>, time: T) -> Self {
        Self {
            store,
            time,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bounds every store call of a pass by `store_timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Frees every claimed lease whose last heartbeat is strictly older than
    /// `threshold`. Fresh leases are never touched and running it twice in a
    /// row frees nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store fails or times out.
    /// Rows already freed stay freed; the next pass picks up the rest.
    ///
    /// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn reclaim_stale(&self, threshold: Duration) -> Result<ReclaimReport> {
        let mut leases = with_timeout(self.store_timeout, self.store.list()).await?;
        leases.sort_unstable_by_key(|lease| lease.worker_id);

        let now = self.time.current_millis();
        let mut report = ReclaimReport {
            scanned: leases.len(),
            ..ReclaimReport::default()
        };

        for lease in leases
            .iter()
            .filter(|lease| lease.is_claimed() && lease.heartbeat_age(now) > threshold)
        {
            let freed = with_timeout(
                self.store_timeout,
                self.store.compare_and_swap(lease, lease.released()),
            )
            .await?;

            if freed {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    worker_id = lease.worker_id,
                    holder = ?lease.holder,
                    age = ?lease.heartbeat_age(now),
                    "reclaimed stale worker lease"
                );
                report.reclaimed.push(lease.worker_id);
            } else {
                report.skipped += 1;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            scanned = report.scanned,
            reclaimed = report.reclaimed.len(),
            skipped = report.skipped,
            "reclaim pass finished"
        );
        Ok(report)
    }
}
