//! In-process coordination store
//!
//! Linearizable within one process: every operation runs under a single mutex,
//! bumps one global revision, and fans the resulting batch out to watchers
//! before releasing it. A bounded history allows watches to resume from a
//! past revision. Leases expire lazily on access and via an optional reaper.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use vitrine_common::{Result, VitrineError};

use super::{
    CoordinationStore, KeyValue, LeaseId, RangeResponse, Revision, WatchEvent, WatchEventKind,
    WatchResponse, Watcher,
};

/// Number of committed batches retained for watch replay
const HISTORY_LIMIT: usize = 16_384;

struct LeaseEntry {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct WatcherEntry {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchResponse>,
}

#[derive(Default)]
struct Inner {
    revision: Revision,
    data: BTreeMap<String, KeyValue>,
    history: VecDeque<WatchResponse>,
    /// Highest revision dropped from `history`
    compacted: Revision,
    watchers: Vec<WatcherEntry>,
    leases: HashMap<LeaseId, LeaseEntry>,
    next_lease: LeaseId,
}

impl Inner {
    fn commit(&mut self, events: Vec<WatchEvent>) {
        let revision = self.revision;

        self.watchers.retain(|watcher| {
            let matching: Vec<WatchEvent> = events
                .iter()
                .filter(|e| e.kv.key.starts_with(&watcher.prefix))
                .cloned()
                .collect();
            if matching.is_empty() {
                return !watcher.tx.is_closed();
            }
            watcher
                .tx
                .send(WatchResponse {
                    revision,
                    events: matching,
                })
                .is_ok()
        });

        self.history.push_back(WatchResponse { revision, events });
        while self.history.len() > HISTORY_LIMIT {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.revision;
            }
        }
    }

    fn detach(&mut self, key: &str, lease: Option<LeaseId>) {
        if let Some(entry) = lease.and_then(|id| self.leases.get_mut(&id)) {
            entry.keys.remove(key);
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision> {
        if let Some(id) = lease
            && !self.leases.contains_key(&id)
        {
            return Err(VitrineError::NotFound(format!("lease {}", id)));
        }

        self.revision += 1;
        let revision = self.revision;

        let previous = self
            .data
            .get(key)
            .map(|kv| (kv.create_revision, kv.lease));
        let create_revision = match previous {
            Some((create_revision, old_lease)) => {
                if old_lease != lease {
                    self.detach(key, old_lease);
                }
                create_revision
            }
            None => revision,
        };

        if let Some(entry) = lease.and_then(|id| self.leases.get_mut(&id)) {
            entry.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value,
            create_revision,
            mod_revision: revision,
            lease,
        };
        self.data.insert(key.to_string(), kv.clone());
        self.commit(vec![WatchEvent {
            kind: WatchEventKind::Put,
            kv,
        }]);

        Ok(revision)
    }

    fn remove_keys(&mut self, keys: Vec<String>) -> usize {
        let removed: Vec<KeyValue> = keys.iter().filter_map(|k| self.data.remove(k)).collect();
        if removed.is_empty() {
            return 0;
        }

        self.revision += 1;
        let revision = self.revision;

        let mut events = Vec::with_capacity(removed.len());
        for kv in removed {
            self.detach(&kv.key, kv.lease);
            events.push(WatchEvent {
                kind: WatchEventKind::Delete,
                kv: KeyValue {
                    key: kv.key,
                    value: Vec::new(),
                    create_revision: kv.create_revision,
                    mod_revision: revision,
                    lease: None,
                },
            });
        }

        let count = events.len();
        self.commit(events);
        count
    }

    fn revoke(&mut self, id: LeaseId) -> bool {
        match self.leases.remove(&id) {
            Some(entry) => {
                self.remove_keys(entry.keys.into_iter().collect());
                true
            }
            None => false,
        }
    }

    fn expire_leases(&mut self, now: Instant) -> usize {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.revoke(*id);
        }
        expired.len()
    }
}

pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    reaper: Option<tokio::task::JoinHandle<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_lease: 1,
                ..Default::default()
            })),
            reaper: None,
        }
    }

    /// Start a background task expiring leases every `interval`
    pub fn with_lease_reaper(mut self, interval: Duration) -> Self {
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let mut guard = inner.lock();
                let expired = guard.expire_leases(Instant::now());
                if expired > 0 {
                    debug!(expired, "expired coordination store leases");
                }
                metrics::gauge!("vitrine_store_leases").set(guard.leases.len() as f64);
            }
        });

        self.reaper = Some(handle);
        self
    }

    /// Current store revision
    pub fn revision(&self) -> Revision {
        self.inner.lock().revision
    }

    /// Lock the state with leases past their deadline already expired
    fn state(&self) -> parking_lot::MutexGuard<'_, Inner> {
        let mut guard = self.inner.lock();
        guard.expire_leases(Instant::now());
        guard
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        Ok(self.state().data.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<RangeResponse> {
        let inner = self.state();
        let kvs = inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(RangeResponse {
            kvs,
            revision: inner.revision,
        })
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision> {
        self.state().put(key, value, lease)
    }

    async fn create(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Option<Revision>> {
        let mut inner = self.state();
        if inner.data.contains_key(key) {
            return Ok(None);
        }
        inner.put(key, value, lease).map(Some)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state().remove_keys(vec![key.to_string()]) > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut inner = self.state();
        let keys: Vec<String> = inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(inner.remove_keys(keys))
    }

    async fn watch(&self, prefix: &str, from_revision: Option<Revision>) -> Result<Watcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.state();

        if let Some(from) = from_revision {
            if inner.compacted > 0 && from <= inner.compacted {
                return Err(VitrineError::Storage(format!(
                    "revision {} has been compacted",
                    from
                )));
            }

            for batch in inner.history.iter().filter(|b| b.revision >= from) {
                let events: Vec<WatchEvent> = batch
                    .events
                    .iter()
                    .filter(|e| e.kv.key.starts_with(prefix))
                    .cloned()
                    .collect();
                if !events.is_empty() {
                    let _ = tx.send(WatchResponse {
                        revision: batch.revision,
                        events,
                    });
                }
            }
        }

        inner.watchers.push(WatcherEntry {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(Watcher::new(rx))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId> {
        let mut inner = self.state();
        let id = inner.next_lease;
        inner.next_lease += 1;
        inner.leases.insert(
            id,
            LeaseEntry {
                ttl,
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.state();
        match inner.leases.get_mut(&lease) {
            Some(entry) => {
                entry.deadline = Instant::now() + entry.ttl;
                Ok(())
            }
            None => Err(VitrineError::NotFound(format!("lease {}", lease))),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        if self.state().revoke(lease) {
            Ok(())
        } else {
            Err(VitrineError::NotFound(format!("lease {}", lease)))
        }
    }
}
