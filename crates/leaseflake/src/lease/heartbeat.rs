use core::time::Duration;
use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    Error, Result, SystemClock, TimeSource,
    lease::{HolderIdentity, LeaseGuard, LeaseStore, WorkerLease, WorkerLeaseManager},
};

/// Background renewal of a held worker lease.
///
/// Spawns a tokio task that calls [`WorkerLeaseManager::renew`] every
/// [`LeaseConfig::heartbeat_interval`]. If renewal ever fails, or does not
/// succeed within [`LeaseConfig::fail_stop_after`] of the last heartbeat, the
/// task fires the lease-lost token and exits; it never tries to reacquire.
/// Hand its [`LeaseGuard`] to a [`LeasedGenerator`] so ID generation stops
/// with it.
///
/// Dropping a `Heartbeat` stops the task without releasing the lease. Call
/// [`Heartbeat::shutdown`] for an orderly release.
///
/// [`LeaseConfig::heartbeat_interval`]: crate::LeaseConfig::heartbeat_interval
/// [`LeaseConfig::fail_stop_after`]: crate::LeaseConfig::fail_stop_after
/// [`LeasedGenerator`]: crate::LeasedGenerator
pub struct Heartbeat<S, T = SystemClock>
where
    S: LeaseStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    manager: Arc<WorkerLeaseManager<S, T>>,
    worker_id: u64,
    identity: HolderIdentity,
    stop: CancellationToken,
    guard: LeaseGuard,
    handle: Option<JoinHandle<()>>,
}

impl<S, T> Heartbeat<S, T>
where
    S: LeaseStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    /// Starts renewing `lease`, as returned by
    /// [`WorkerLeaseManager::acquire_lease`] or [`WorkerLeaseManager::claim`].
    /// The first renewal happens one interval from now, and the fail-stop
    /// deadline counts from the heartbeat already on the row.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseLost`] if `lease` is not a claimed row.
    pub fn spawn(manager: Arc<WorkerLeaseManager<S, T>>, lease: &WorkerLease) -> Result<Self> {
        let worker_id = lease.worker_id;
        let identity = lease
            .holder
            .clone()
            .filter(|_| lease.is_claimed())
            .ok_or(Error::LeaseLost { worker_id })?;

        let stop = CancellationToken::new();
        let guard = LeaseGuard::new(
            CancellationToken::new(),
            lease.last_heartbeat,
            manager.config().fail_stop_after(),
        );

        let handle = tokio::spawn(renew_loop(
            Arc::clone(&manager),
            worker_id,
            identity.clone(),
            stop.clone(),
            guard.clone(),
        ));

        Ok(Self {
            manager,
            worker_id,
            identity,
            stop,
            guard,
            handle: Some(handle),
        })
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Guard tracking this lease, for a [`LeasedGenerator`].
    ///
    /// [`LeasedGenerator`]: crate::LeasedGenerator
    pub fn guard(&self) -> LeaseGuard {
        self.guard.clone()
    }

    /// Token cancelled once the lease is known to be lost.
    pub fn lease_lost_token(&self) -> CancellationToken {
        self.guard.lost_token()
    }

    pub fn is_lost(&self) -> bool {
        self.guard.is_lost()
    }

    /// Completes when the lease is lost.
    pub async fn lost(&self) {
        self.guard.lost_token().cancelled().await;
    }

    /// Stops renewing, waits for the task to finish, then releases the lease
    /// if it is still held. Returns whether the lease was released.
    ///
    /// Never fails: a release error is logged and the lease is left for the
    /// reclaimer.
    pub async fn shutdown(mut self) -> bool {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(_e) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::warn!(worker_id = self.worker_id, error = %_e, "heartbeat task failed");
            }
        }

        if self.guard.is_lost() {
            return false;
        }

        match self.manager.release(self.worker_id, &self.identity).await {
            Ok(released) => released,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    worker_id = self.worker_id,
                    error = %_e,
                    "could not release lease, leaving it to the reclaimer"
                );
                false
            }
        }
    }
}

impl<S, T> Drop for Heartbeat<S, T>
where
    S: LeaseStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl<S, T> core::fmt::Debug for Heartbeat<S, T>
where
    S: LeaseStore + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("worker_id", &self.worker_id)
            .field("identity", &self.identity)
            .field("lost", &self.guard.is_lost())
            .finish_non_exhaustive()
    }
}

async fn renew_loop<S, T>(
    manager: Arc<WorkerLeaseManager<S, T>>,
    worker_id: u64,
    identity: HolderIdentity,
    stop: CancellationToken,
    guard: LeaseGuard,
) where
    S: LeaseStore,
    T: TimeSource + Sync,
{
    let period = manager.config().heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let lost = guard.lost_token();

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = lost.cancelled() => break,
            _ = ticker.tick() => {
                let now = manager.time().current_millis();
                if !guard.is_held(now) {
                    break;
                }
                let left = guard.remaining(now).unwrap_or(Duration::MAX);
                match tokio::time::timeout(left, manager.renew(worker_id, &identity)).await {
                    Ok(Ok(renewed_at)) => guard.record_renewal(renewed_at),
                    Ok(Err(_e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(worker_id, error = %_e, "heartbeat stopped, lease lost");
                        guard.mark_lost();
                        break;
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            worker_id,
                            "renewal overran the fail-stop deadline, lease lost"
                        );
                        guard.mark_lost();
                        break;
                    }
                }
            }
        }
    }
}
