//! Ownership of per-exhibit background watch tasks
//!
//! Each exhibit id maps to the tasks syncing its mirrors and a cancellation
//! token shared by them. Tasks may also end on their own when they observe a
//! delete; such finished entries are replaced on the next `ensure`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ExhibitWatch {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ExhibitWatch {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.handles.iter().any(|h| !h.is_finished())
    }
}

pub struct WatchSupervisor {
    watches: DashMap<String, ExhibitWatch>,
    root: CancellationToken,
}

impl WatchSupervisor {
    pub fn new() -> Self {
        Self {
            watches: DashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown; parent of every per-exhibit token
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Start watches for `id` via `spawn` unless live ones already exist.
    ///
    /// Returns whether new tasks were spawned.
    pub fn ensure<F>(&self, id: &str, spawn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Vec<JoinHandle<()>>,
    {
        if self.root.is_cancelled() {
            return false;
        }

        match self.watches.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return false;
                }
                let token = self.root.child_token();
                let handles = spawn(token.clone());
                entry.insert(ExhibitWatch { token, handles });
            }
            Entry::Vacant(entry) => {
                let token = self.root.child_token();
                let handles = spawn(token.clone());
                entry.insert(ExhibitWatch { token, handles });
            }
        }

        debug!(exhibit_id = %id, "exhibit watches started");
        true
    }

    /// Cancel and forget the watches of `id`
    pub fn cancel(&self, id: &str) -> bool {
        match self.watches.remove(id) {
            Some((_, watch)) => {
                watch.token.cancel();
                debug!(exhibit_id = %id, "exhibit watches cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.watches
            .get(id)
            .map(|w| w.is_live())
            .unwrap_or(false)
    }

    /// Number of exhibits with at least one live watch task
    pub fn live_count(&self) -> usize {
        self.watches.iter().filter(|w| w.is_live()).count()
    }

    pub fn shutdown(&self) {
        self.root.cancel();
        self.watches.clear();
    }
}

impl Default for WatchSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_task(token: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(async move { token.cancelled().await })]
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let supervisor = WatchSupervisor::new();
        assert!(supervisor.ensure("e1", pending_task));
        assert!(!supervisor.ensure("e1", pending_task));
        assert!(supervisor.is_watching("e1"));
        assert_eq!(supervisor.live_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let supervisor = WatchSupervisor::new();
        supervisor.ensure("e1", pending_task);
        assert!(supervisor.cancel("e1"));
        assert!(!supervisor.is_watching("e1"));
        assert!(!supervisor.cancel("e1"));
    }

    #[tokio::test]
    async fn test_finished_entry_is_replaced() {
        let supervisor = WatchSupervisor::new();
        supervisor.ensure("e1", |_| vec![tokio::spawn(async {})]);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(!supervisor.is_watching("e1"));
        assert!(supervisor.ensure("e1", pending_task));
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_watches() {
        let supervisor = WatchSupervisor::new();
        supervisor.ensure("e1", pending_task);
        supervisor.shutdown();
        assert!(!supervisor.ensure("e2", pending_task));
        assert_eq!(supervisor.live_count(), 0);
    }
}
