//! Worker identity leases.
//!
//! A fixed pool of worker IDs (`0..=max_worker_id`) lives in a shared
//! [`LeaseStore`]. Each process claims one with
//! [`WorkerLeaseManager::acquire`], keeps it alive with a [`Heartbeat`], and
//! frees it on shutdown. Leases of crashed processes are freed by the
//! [`StaleLeaseReclaimer`] once their heartbeat is older than a threshold.
//!
//! Per lease, the only legal transitions are:
//!
//! ```text
//! free --acquire--> claimed --renew--> claimed
//! claimed --release | reclaim--> free
//! ```
//!
//! Uniqueness across processes rests entirely on the store's
//! compare-and-swap; nothing here locks across processes.

mod config;
mod heartbeat;
mod leased;
mod manager;
mod memory;
mod reclaimer;
mod record;
#[cfg(feature = "sled")]
mod sled;
mod store;

pub use config::*;
pub use heartbeat::*;
pub use leased::*;
pub use manager::*;
pub use memory::*;
pub use reclaimer::*;
pub use record::*;
#[cfg(feature = "sled")]
pub use self::sled::*;
pub use store::*;
