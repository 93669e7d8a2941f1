//! Vitrine Persistence - Distributed exhibit state
//!
//! Exhibit definitions, runtime info, and last-accessed timestamps live in the
//! coordination store. Definitions and runtime info are mirrored in process and
//! kept coherent by per-exhibit watch loops owned by a [`WatchSupervisor`].

pub mod keys;
pub mod mirror;
pub mod state;
pub mod supervisor;

pub use keys::{KeyKind, KeySpace};
pub use mirror::Mirror;
pub use state::{CachedState, DistributedState, StateOptions};
pub use supervisor::WatchSupervisor;
