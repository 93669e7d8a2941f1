//! Coordination store contract
//!
//! A strongly consistent key/value service with a global revision counter,
//! prefix watches delivering ordered event batches, and TTL leases to which
//! keys can be attached.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vitrine_common::Result;

/// Global, monotonically increasing store revision
pub type Revision = u64;

/// Identifier of a granted lease
pub type LeaseId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which the key was created
    pub create_revision: Revision,
    /// Revision of the last modification
    pub mod_revision: Revision,
    pub lease: Option<LeaseId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    /// Store revision the range was read at
    pub revision: Revision,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// For deletes, `mod_revision` is the deleting revision and `value` is empty
    pub kv: KeyValue,
}

impl WatchEvent {
    /// A put that brought the key into existence
    pub fn is_create(&self) -> bool {
        self.kind == WatchEventKind::Put && self.kv.create_revision == self.kv.mod_revision
    }

    pub fn is_delete(&self) -> bool {
        self.kind == WatchEventKind::Delete
    }
}

/// Batch of events committed at one revision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchResponse {
    pub revision: Revision,
    pub events: Vec<WatchEvent>,
}

/// Receiving side of a prefix watch.
///
/// Dropping the watcher unregisters it from the store.
#[derive(Debug)]
pub struct Watcher {
    rx: mpsc::UnboundedReceiver<WatchResponse>,
}

impl Watcher {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchResponse>) -> Self {
        Self { rx }
    }

    /// Next batch of events, or `None` once the store closed the watch
    pub async fn next(&mut self) -> Option<WatchResponse> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// All keys starting with `prefix`, in key order
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse>;

    /// Write `value`, optionally attaching the key to `lease`
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision>;

    /// Write only if the key does not exist; `None` when it already did
    async fn create(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Option<Revision>>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key under `prefix` in a single revision
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Watch keys under `prefix`.
    ///
    /// With `from_revision`, events committed at or after it are replayed first.
    async fn watch(&self, prefix: &str, from_revision: Option<Revision>) -> Result<Watcher>;

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId>;

    async fn keep_alive(&self, lease: LeaseId) -> Result<()>;

    /// Revoke a lease and delete every key attached to it
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;
}
