//! Vitrine Consistency - Coordination substrate
//!
//! This crate provides:
//! - `CoordinationStore`: strongly consistent key/value contract with watches and leases
//! - `MemoryStore`: in-process implementation of the contract
//! - `Session`: a kept-alive lease that scopes ephemeral keys
//! - `DistributedRwLock`: read/write lock derived from a session

pub mod lock;
pub mod session;
pub mod store;

pub use lock::DistributedRwLock;
pub use session::Session;
pub use store::memory::MemoryStore;
pub use store::{
    CoordinationStore, KeyValue, LeaseId, RangeResponse, Revision, WatchEvent, WatchEventKind,
    WatchResponse, Watcher,
};
