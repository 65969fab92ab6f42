#![doc = include_str!("../README.md")]

mod error;
mod generator;
mod layout;
pub mod lease;
mod rand;
mod time;

pub use crate::error::*;
pub use crate::generator::*;
pub use crate::layout::*;
pub use crate::lease::{
    HolderIdentity, Heartbeat, LeaseConfig, LeaseGuard, LeaseState, LeaseStore, LeasedGenerator,
    MemoryLeaseStore, ReclaimReport, StaleLeaseReclaimer, WorkerLease, WorkerLeaseManager,
};
#[cfg(feature = "sled")]
pub use crate::lease::SledLeaseStore;
pub use crate::rand::*;
pub use crate::time::*;
