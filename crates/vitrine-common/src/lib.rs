//! Vitrine Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Vitrine components:
//! - Error taxonomy and error codes
//! - Exhibit domain model and lifecycle events
//! - Request-scoped cancellation context
//! - Duration parsing for leases and config values
//! - Bounded eviction cache

pub mod cache;
pub mod context;
pub mod duration;
pub mod error;
pub mod model;

// Re-exports for convenience
pub use cache::EvictionCache;
pub use context::Context;
pub use duration::parse_duration;
pub use error::{ErrorCode, Result, VitrineError};

/// Event source attached to every lifecycle event
pub const EVENT_SOURCE: &str = "vitrine";

/// Port used when an object does not declare one
pub const DEFAULT_OBJECT_PORT: &str = "80";

/// Lock guarding all exhibit-level mutations of one exhibit
pub const EXHIBIT_LOCK: &str = "exhibit";

/// Lock guarding runtime info transitions of one exhibit
pub const RUNTIME_INFO_LOCK: &str = "runtime_info";

/// Pseudo exhibit id for locks that span the whole exhibit collection
pub const GLOBAL_LOCK_ID: &str = "all";

/// Lock serializing exhibit creation across replicas
pub const EXHIBITS_LOCK: &str = "exhibits";

/// Name of the container backing `object` inside `exhibit_name`
pub fn container_name(exhibit_name: &str, object: &str) -> String {
    format!("{}_{}", exhibit_name, object)
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
