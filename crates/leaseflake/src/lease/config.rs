use core::time::Duration;

use crate::{BitLayout, Error, Result};

/// Default interval between lease renewals.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default age after which a silent lease is considered abandoned.
pub const DEFAULT_RECLAIM_THRESHOLD: Duration = Duration::from_secs(180);

/// Minimum ratio between the reclaim threshold and the heartbeat interval.
pub const MIN_RECLAIM_HEARTBEATS: u32 = 3;

/// Default upper bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retries after a transient store failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry. Doubles on every further attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Tuning for [`WorkerLeaseManager`] and [`Heartbeat`].
///
/// [`WorkerLeaseManager`]: crate::WorkerLeaseManager
/// [`Heartbeat`]: crate::Heartbeat
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Largest worker ID in the pool; the pool is `0..=max_worker_id`.
    pub max_worker_id: u64,
    pub heartbeat_interval: Duration,
    pub store_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::for_layout(&BitLayout::default())
    }
}

impl LeaseConfig {
    /// A config whose pool covers every worker ID `layout` can encode.
    pub const fn for_layout(layout: &BitLayout) -> Self {
        Self {
            max_worker_id: layout.max_worker_id(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub const fn pool_size(&self) -> u64 {
        self.max_worker_id + 1
    }

    /// Longest a single [`renew`] can take before it gives up: every attempt
    /// hits the store timeout and every backoff is slept in full.
    ///
    /// [`renew`]: crate::WorkerLeaseManager::renew
    pub fn renew_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let mut budget = self.store_timeout.saturating_mul(attempts);
        let mut backoff = self.retry_backoff;
        for _ in 0..self.max_retries {
            budget = budget.saturating_add(backoff);
            backoff = backoff.saturating_mul(2);
        }
        budget
    }

    /// Heartbeat age at which the holder stops trusting its lease.
    ///
    /// One interval until the next renewal, plus the worst case of that
    /// renewal. A [`LeasedGenerator`] refuses to generate past this age even
    /// if no renewal has reported a failure yet.
    ///
    /// [`LeasedGenerator`]: crate::LeasedGenerator
    pub fn fail_stop_after(&self) -> Duration {
        self.heartbeat_interval.saturating_add(self.renew_budget())
    }

    /// Checks the timings against the threshold the reclaimer will use.
    ///
    /// The threshold must cover at least [`MIN_RECLAIM_HEARTBEATS`] heartbeat
    /// intervals so a few slow or failed renewals do not get a live lease
    /// reclaimed. It must also be strictly longer than
    /// [`fail_stop_after`](Self::fail_stop_after), so a holder whose renewals
    /// stall stops generating before its lease can be handed to someone else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLeaseConfig`] if any interval is zero or the
    /// threshold is too short.
    pub fn validate(&self, reclaim_threshold: Duration) -> Result<()> {
        if self.heartbeat_interval.is_zero() || self.store_timeout.is_zero() {
            return Err(Error::InvalidLeaseConfig {
                reason: "heartbeat interval and store timeout must be non-zero".to_string(),
            });
        }
        let min_threshold = self.heartbeat_interval.saturating_mul(MIN_RECLAIM_HEARTBEATS);
        if reclaim_threshold < min_threshold {
            return Err(Error::InvalidLeaseConfig {
                reason: format!(
                    "reclaim threshold {reclaim_threshold:?} is shorter than \
                     {MIN_RECLAIM_HEARTBEATS} heartbeats ({min_threshold:?})"
                ),
            });
        }
        let fail_stop = self.fail_stop_after();
        if reclaim_threshold <= fail_stop {
            return Err(Error::InvalidLeaseConfig {
                reason: format!(
                    "reclaim threshold {reclaim_threshold:?} does not outlast a stalled \
                     renewal ({fail_stop:?}); lower the store timeout or retries"
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = LeaseConfig::default();
        assert_eq!(config.pool_size(), 4096);
        assert!(config.validate(DEFAULT_RECLAIM_THRESHOLD).is_ok());
    }

    #[test]
    fn threshold_must_cover_three_heartbeats() {
        let config = LeaseConfig {
            heartbeat_interval: Duration::from_secs(10),
            store_timeout: Duration::from_secs(1),
            ..LeaseConfig::default()
        };
        assert!(config.validate(Duration::from_secs(30)).is_ok());
        assert!(matches!(
            config.validate(Duration::from_secs(29)),
            Err(Error::InvalidLeaseConfig { .. })
        ));
    }

    #[test]
    fn renew_budget_counts_every_attempt_and_backoff() {
        let config = LeaseConfig {
            heartbeat_interval: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            ..LeaseConfig::default()
        };
        // 4 attempts of 5s, then 200 + 400 + 800 ms of backoff
        assert_eq!(config.renew_budget(), Duration::from_millis(21_400));
        assert_eq!(config.fail_stop_after(), Duration::from_millis(31_400));

        let no_retries = LeaseConfig {
            max_retries: 0,
            ..config.clone()
        };
        assert_eq!(no_retries.renew_budget(), Duration::from_secs(5));
    }

    #[test]
    fn threshold_must_outlast_a_stalled_renewal() {
        // three heartbeats fit in 30s, but a stalled renewal runs to 31.4s
        let config = LeaseConfig {
            heartbeat_interval: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            ..LeaseConfig::default()
        };
        assert!(matches!(
            config.validate(Duration::from_secs(30)),
            Err(Error::InvalidLeaseConfig { .. })
        ));
        assert!(config.validate(Duration::from_millis(31_400)).is_err());
        assert!(config.validate(Duration::from_millis(31_401)).is_ok());

        let slow_store = LeaseConfig {
            heartbeat_interval: Duration::from_secs(30),
            store_timeout: Duration::from_secs(60),
            ..LeaseConfig::default()
        };
        assert!(slow_store.validate(Duration::from_secs(90)).is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = LeaseConfig {
            heartbeat_interval: Duration::ZERO,
            ..LeaseConfig::default()
        };
        assert!(config.validate(DEFAULT_RECLAIM_THRESHOLD).is_err());
    }
}
