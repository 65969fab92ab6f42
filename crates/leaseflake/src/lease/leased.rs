use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::CancellationToken;

use crate::{Error, RandSource, Result, SequenceGenerator, SystemClock, ThreadRandom, TimeSource};

/// Shared view of whether a worker lease can still be trusted.
///
/// A lease is untrusted once its lost token fires, or once the last
/// successful heartbeat is [`LeaseConfig::fail_stop_after`] old. The second
/// check does not depend on the heartbeat task being scheduled at all, so a
/// starved or hung renewal still stops generation before the reclaim
/// threshold is reached.
///
/// Crossing the deadline fires the lost token, so everything watching it
/// observes the loss.
///
/// [`LeaseConfig::fail_stop_after`]: crate::LeaseConfig::fail_stop_after
#[derive(Clone, Debug)]
pub struct LeaseGuard {
    lost: CancellationToken,
    deadline: Option<RenewalDeadline>,
}

#[derive(Clone, Debug)]
struct RenewalDeadline {
    /// Heartbeat timestamp last written to the store, in milliseconds.
    renewed_at: Arc<AtomicU64>,
    fail_stop_after: u64,
}

impl LeaseGuard {
    /// A guard that also expires `fail_stop_after` past the heartbeat
    /// `renewed_at` (milliseconds since the Unix epoch).
    pub fn new(lost: CancellationToken, renewed_at: u64, fail_stop_after: Duration) -> Self {
        Self {
            lost,
            deadline: Some(RenewalDeadline {
                renewed_at: Arc::new(AtomicU64::new(renewed_at)),
                fail_stop_after: u64::try_from(fail_stop_after.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// A guard that only follows `lost`, for worker IDs not backed by a
    /// heartbeat.
    pub const fn unbounded(lost: CancellationToken) -> Self {
        Self {
            lost,
            deadline: None,
        }
    }

    /// Whether the lease can be used at `now` (milliseconds since the Unix
    /// epoch). Fires the lost token when the deadline has passed.
    pub fn is_held(&self, now: u64) -> bool {
        if self.lost.is_cancelled() {
            return false;
        }
        if self.remaining(now).is_some_and(|left| left.is_zero()) {
            #[cfg(feature = "tracing")]
            tracing::error!(now, "no successful heartbeat within the fail-stop window");
            self.lost.cancel();
            return false;
        }
        true
    }

    /// Time left before the deadline at `now`; `None` for an unbounded guard.
    pub fn remaining(&self, now: u64) -> Option<Duration> {
        self.deadline.as_ref().map(|deadline| {
            let age = now.saturating_sub(deadline.renewed_at.load(Ordering::Acquire));
            Duration::from_millis(deadline.fail_stop_after.saturating_sub(age))
        })
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub(crate) fn record_renewal(&self, renewed_at: u64) {
        if let Some(deadline) = &self.deadline {
            deadline.renewed_at.fetch_max(renewed_at, Ordering::AcqRel);
        }
    }

    pub(crate) fn mark_lost(&self) {
        self.lost.cancel();
    }
}

impl From<CancellationToken> for LeaseGuard {
    fn from(lost: CancellationToken) -> Self {
        Self::unbounded(lost)
    }
}

/// A [`SequenceGenerator`] that refuses to generate once its worker lease is
/// lost.
///
/// The generator's worker ID is only unique while the lease is held. As soon
/// as the [`LeaseGuard`] reports the lease lost, usually because a
/// [`Heartbeat`] failed to renew it in time, every call to
/// [`generate`](Self::generate) fails with [`Error::LeaseLost`] because
/// another process may already be minting IDs with the same worker ID.
///
/// The deadline is read from the generator's own [`TimeSource`], which must
/// be the clock that stamps the lease heartbeats.
///
/// [`Heartbeat`]: crate::Heartbeat
#[derive(Clone, Debug)]
pub struct LeasedGenerator<T = SystemClock, R = ThreadRandom>
where
    T: TimeSource,
    R: RandSource,
{
    generator: SequenceGenerator<T, R>,
    guard: LeaseGuard,
}

impl<T, R> LeasedGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    pub const fn new(generator: SequenceGenerator<T, R>, guard: LeaseGuard) -> Self {
        Self { generator, guard }
    }

    /// Generates the next ID while the lease is held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseLost`] once the lease is lost or its heartbeat
    /// is too old, and otherwise any error of [`SequenceGenerator::generate`].
    pub fn generate(&self) -> Result<u64> {
        if self.is_lease_lost() {
            return Err(Error::LeaseLost {
                worker_id: self.generator.worker_id(),
            });
        }
        self.generator.generate()
    }

    pub fn is_lease_lost(&self) -> bool {
        !self.guard.is_held(self.generator.time().current_millis())
    }

    pub const fn guard(&self) -> &LeaseGuard {
        &self.guard
    }

    pub const fn generator(&self) -> &SequenceGenerator<T, R> {
        &self.generator
    }

    pub const fn worker_id(&self) -> u64 {
        self.generator.worker_id()
    }

    pub const fn decode_timestamp(&self, id: u64) -> u64 {
        self.generator.decode_timestamp(id)
    }

    pub const fn decode_worker(&self, id: u64) -> u64 {
        self.generator.decode_worker(id)
    }

    pub const fn decode_sequence(&self, id: u64) -> u64 {
        self.generator.decode_sequence(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_expires_at_the_fail_stop_age() {
        let lost = CancellationToken::new();
        let guard = LeaseGuard::new(lost.clone(), 10_000, Duration::from_secs(5));

        assert!(guard.is_held(14_999));
        assert_eq!(guard.remaining(14_999), Some(Duration::from_millis(1)));

        // a renewal pushes the deadline out; a stale one does not pull it in
        guard.record_renewal(12_000);
        guard.record_renewal(11_000);
        assert!(guard.is_held(16_999));

        assert!(!guard.is_held(17_000));
        assert!(lost.is_cancelled());
        // once lost, a later renewal does not revive it
        guard.record_renewal(17_000);
        assert!(!guard.is_held(17_001));
    }

    #[test]
    fn unbounded_guard_follows_the_token() {
        let lost = CancellationToken::new();
        let guard = LeaseGuard::from(lost.clone());
        assert!(guard.is_held(u64::MAX));
        assert_eq!(guard.remaining(0), None);

        lost.cancel();
        assert!(guard.is_lost());
        assert!(!guard.is_held(0));
    }

    #[test]
    fn clock_behind_the_heartbeat_keeps_the_lease() {
        let guard = LeaseGuard::new(CancellationToken::new(), 10_000, Duration::from_secs(5));
        assert!(guard.is_held(9_000));
        assert_eq!(guard.remaining(9_000), Some(Duration::from_secs(5)));
    }
}
