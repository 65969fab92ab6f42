use core::{fmt, time::Duration};
use serde::{Deserialize, Serialize};

/// Whether a worker ID is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Free,
    Claimed,
}

/// Opaque token naming the process that holds a lease.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderIdentity(String);

impl HolderIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Builds `"{host}:{pid}:{nonce}"` for the running process.
    ///
    /// The host comes from `HOSTNAME` (or `COMPUTERNAME`), falling back to
    /// `localhost`. The random nonce keeps a restarted process that reuses a
    /// pid from being mistaken for its predecessor.
    pub fn for_current_process() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        let nonce: u32 = rand::random();
        Self(format!("{host}:{}:{nonce:08x}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HolderIdentity {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

impl From<&str> for HolderIdentity {
    fn from(identity: &str) -> Self {
        Self(identity.to_string())
    }
}

/// One row of the worker ID pool.
///
/// Rows are created once per worker ID as [`LeaseState::Free`] and never
/// deleted, only cycled between states.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerLease {
    pub worker_id: u64,
    /// `None` while the lease is free.
    pub holder: Option<HolderIdentity>,
    /// Milliseconds since the Unix epoch of the last claim or renewal.
    pub last_heartbeat: u64,
    pub state: LeaseState,
}

impl WorkerLease {
    /// An unclaimed row, as seeded into a fresh pool.
    pub const fn free(worker_id: u64) -> Self {
        Self {
            worker_id,
            holder: None,
            last_heartbeat: 0,
            state: LeaseState::Free,
        }
    }

    pub fn claimed(worker_id: u64, holder: HolderIdentity, now_millis: u64) -> Self {
        Self {
            worker_id,
            holder: Some(holder),
            last_heartbeat: now_millis,
            state: LeaseState::Claimed,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == LeaseState::Free
    }

    pub fn is_claimed(&self) -> bool {
        self.state == LeaseState::Claimed
    }

    pub fn is_held_by(&self, identity: &HolderIdentity) -> bool {
        self.is_claimed() && self.holder.as_ref() == Some(identity)
    }

    /// Time since the last heartbeat. Zero if the heartbeat is in the future.
    pub const fn heartbeat_age(&self, now_millis: u64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.last_heartbeat))
    }

    /// The same claim with a fresh heartbeat.
    #[must_use]
    pub fn renewed(&self, now_millis: u64) -> Self {
        Self {
            last_heartbeat: now_millis,
            ..self.clone()
        }
    }

    /// The row after a release or reclamation. The last heartbeat is kept
    /// for diagnostics.
    #[must_use]
    pub const fn released(&self) -> Self {
        Self {
            worker_id: self.worker_id,
            holder: None,
            last_heartbeat: self.last_heartbeat,
            state: LeaseState::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_checks_state_and_identity() {
        let me = HolderIdentity::from("host-a:1:00000001");
        let other = HolderIdentity::from("host-b:2:00000002");
        let lease = WorkerLease::claimed(3, me.clone(), 1_000);

        assert!(lease.is_held_by(&me));
        assert!(!lease.is_held_by(&other));
        assert!(!lease.released().is_held_by(&me));
        assert!(!WorkerLease::free(3).is_held_by(&me));
    }

    #[test]
    fn release_keeps_the_last_heartbeat() {
        let lease = WorkerLease::claimed(3, "me".into(), 1_000).renewed(2_500);
        let released = lease.released();
        assert_eq!(released.state, LeaseState::Free);
        assert_eq!(released.holder, None);
        assert_eq!(released.last_heartbeat, 2_500);
    }

    #[test]
    fn heartbeat_age_saturates() {
        let lease = WorkerLease::claimed(0, "me".into(), 5_000);
        assert_eq!(lease.heartbeat_age(8_000), Duration::from_secs(3));
        assert_eq!(lease.heartbeat_age(4_000), Duration::ZERO);
    }

    #[test]
    fn process_identities_are_distinct() {
        let a = HolderIdentity::for_current_process();
        let b = HolderIdentity::for_current_process();
        assert_ne!(a, b);
        assert!(a.as_str().contains(&std::process::id().to_string()));
    }
}
