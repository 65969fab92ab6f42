//! Error types shared by the generator, the layout, and the lease protocol.
//!
//! Every failure in the ID composition path is surfaced to the caller. Clock
//! regression and lease loss are never corrected internally, since doing so
//! could hand out duplicate identifiers.

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `leaseflake` can emit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The bit widths cannot be packed into a 63-bit ID.
    #[error("invalid layout: {reason}")]
    InvalidLayout { reason: String },

    /// The worker ID does not fit in the layout's worker field.
    #[error("worker id {worker_id} out of range (max = {max_worker_id})")]
    InvalidWorkerId { worker_id: u64, max_worker_id: u64 },

    /// The sequence start policy does not fit in the layout's sequence field.
    #[error("invalid sequence start: {reason}")]
    InvalidSequenceStart { reason: String },

    /// Lease timings are inconsistent, e.g. the reclaim threshold would
    /// free leases that are still heartbeating.
    #[error("invalid lease config: {reason}")]
    InvalidLeaseConfig { reason: String },

    /// The clock regressed since the last successful generation.
    ///
    /// Fatal to the current call. Callers should abort or pause until the
    /// clock catches up; the generator never retries internally.
    #[error("clock moved backwards: refusing to generate id for {} seconds", .last - .now)]
    ClockMovedBackward { last: u64, now: u64 },

    /// The clock reports a time earlier than the layout epoch.
    #[error("clock ({now}s) is earlier than the layout epoch ({epoch}s)")]
    ClockBeforeEpoch { now: u64, epoch: u64 },

    /// Seconds since the epoch no longer fit in the timestamp field.
    #[error("timestamp {elapsed}s exceeds the layout maximum of {max}s")]
    TimestampOverflow { elapsed: u64, max: u64 },

    /// The sequence was exhausted and the clock never advanced to the next
    /// tick within the polling budget.
    #[error("clock stalled at {last}s while waiting for the next tick")]
    ClockStalled { last: u64 },

    /// Every worker ID in the pool is claimed by another process.
    ///
    /// Widen the worker field or reduce the number of concurrent processes.
    #[error("no free worker id among {pool_size} leases")]
    WorkerIdExhausted { pool_size: u64 },

    /// A pinned worker ID is held by another process or lies outside the
    /// pool.
    #[error("worker id {worker_id} is not available for leasing")]
    WorkerIdUnavailable { worker_id: u64 },

    /// The lease for `worker_id` no longer belongs to this process.
    ///
    /// Another process may be using the same worker ID, so generation must
    /// stop until a new lease is acquired.
    #[error("lease for worker id {worker_id} was lost")]
    LeaseLost { worker_id: u64 },

    /// The lease store failed or timed out.
    #[error("lease store unavailable: {context}")]
    StoreUnavailable { context: String },

    /// The generator lock was poisoned by a panicking thread.
    ///
    /// Cannot occur with the `parking-lot` feature.
    #[error("generator lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Returns `true` for failures that may succeed when retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    pub(crate) fn store(context: impl core::fmt::Display) -> Self {
        Self::StoreUnavailable {
            context: context.to_string(),
        }
    }
}

#[cfg(not(feature = "parking-lot"))]
use std::sync::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
