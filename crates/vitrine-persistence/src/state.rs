//! Distributed exhibit state
//!
//! Reads are served from the in-process mirror when an entry is present and
//! fall through to the coordination store otherwise. The mirror is mutated by
//! the per-exhibit watch loops, by `create_exhibit`, and by local runtime info
//! writes; a miss is never taken as absence.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitrine_common::model::{Exhibit, RuntimeInfo};
use vitrine_common::{Context, Result, VitrineError};
use vitrine_consistency::{
    CoordinationStore, DistributedRwLock, Revision, Session, WatchEventKind,
};

use crate::keys::{KeyKind, KeySpace};
use crate::mirror::Mirror;
use crate::supervisor::WatchSupervisor;

#[async_trait]
pub trait DistributedState: Send + Sync {
    /// Persist a new definition; `AlreadyExists` if the id is taken
    async fn create_exhibit(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()>;

    async fn get_exhibit_by_id(&self, ctx: &Context, id: &str) -> Result<Exhibit>;

    async fn get_all_exhibits(&self, ctx: &Context) -> Result<Vec<Exhibit>>;

    /// Remove definition, runtime info, and last-accessed, and stop syncing the id
    async fn delete_exhibit_by_id(&self, ctx: &Context, id: &str) -> Result<()>;

    async fn get_runtime_info(&self, ctx: &Context, id: &str) -> Result<RuntimeInfo>;

    /// Read runtime info from the store, bypassing the mirror
    async fn refresh_runtime_info(&self, ctx: &Context, id: &str) -> Result<RuntimeInfo>;

    async fn set_runtime_info(&self, ctx: &Context, id: &str, info: &RuntimeInfo) -> Result<()>;

    async fn delete_runtime_info(&self, ctx: &Context, id: &str) -> Result<()>;

    async fn get_last_accessed(&self, ctx: &Context, id: &str) -> Result<i64>;

    async fn set_last_accessed(&self, ctx: &Context, id: &str, timestamp: i64) -> Result<()>;

    async fn delete_last_accessed(&self, ctx: &Context, id: &str) -> Result<()>;

    /// Named read/write lock scoped to one exhibit
    fn get_rw_lock(&self, id: &str, lock_name: &str) -> DistributedRwLock;
}

#[derive(Clone, Debug)]
pub struct StateOptions {
    pub base_key: String,
    /// Maintain in-process mirrors and watch loops
    pub caching: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            base_key: "vitrine".to_string(),
            caching: true,
        }
    }
}

pub struct CachedState {
    store: Arc<dyn CoordinationStore>,
    session: Arc<Session>,
    keys: KeySpace,
    caching: bool,
    exhibits: Mirror<Exhibit>,
    runtime_info: Mirror<RuntimeInfo>,
    supervisor: Arc<WatchSupervisor>,
}

impl CachedState {
    /// Build the state component and, with caching, load every existing
    /// exhibit into the mirrors and start watching from the load revision.
    pub async fn start(session: Arc<Session>, options: StateOptions) -> Result<Arc<Self>> {
        let state = Arc::new(Self {
            store: session.store().clone(),
            session,
            keys: KeySpace::new(&options.base_key),
            caching: options.caching,
            exhibits: Mirror::new(),
            runtime_info: Mirror::new(),
            supervisor: Arc::new(WatchSupervisor::new()),
        });

        if state.caching {
            let revision = state.bootstrap().await?;
            state.spawn_creation_watch(revision + 1).await?;
        }

        Ok(state)
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn supervisor(&self) -> &Arc<WatchSupervisor> {
        &self.supervisor
    }

    /// Whether the mirror currently holds the definition of `id`
    pub fn is_exhibit_mirrored(&self, id: &str) -> bool {
        self.exhibits.contains(id)
    }

    pub fn is_runtime_info_mirrored(&self, id: &str) -> bool {
        self.runtime_info.contains(id)
    }

    /// Cancel every watch loop
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    async fn bootstrap(self: &Arc<Self>) -> Result<Revision> {
        let range = self.store.get_prefix(self.keys.root()).await?;
        let mut ids = Vec::new();

        for kv in &range.kvs {
            let Some((id, kind)) = self.keys.parse(&kv.key) else {
                continue;
            };
            match kind {
                KeyKind::Meta => match serde_json::from_slice::<Exhibit>(&kv.value) {
                    Ok(exhibit) => {
                        self.exhibits.upsert(id, kv.mod_revision, exhibit);
                        ids.push(id.to_string());
                    }
                    Err(e) => warn!(exhibit_id = %id, error = %e, "skipping undecodable exhibit"),
                },
                KeyKind::RuntimeInfo => {
                    if let Ok(info) = serde_json::from_slice::<RuntimeInfo>(&kv.value) {
                        self.runtime_info.upsert(id, kv.mod_revision, info);
                    }
                }
                KeyKind::LastAccessed | KeyKind::Lock => {}
            }
        }

        for id in &ids {
            self.start_exhibit_watches(id, range.revision + 1);
        }

        info!(
            exhibits = ids.len(),
            revision = range.revision,
            "distributed state bootstrapped"
        );
        Ok(range.revision)
    }

    async fn spawn_creation_watch(self: &Arc<Self>, from: Revision) -> Result<()> {
        let mut watcher = self.store.watch(self.keys.root(), Some(from)).await?;
        let state = Arc::downgrade(self);
        let token = self.supervisor.root_token();

        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = token.cancelled() => break,
                    batch = watcher.next() => batch,
                };
                let Some(batch) = batch else {
                    warn!("creation watch closed");
                    break;
                };
                let Some(state) = state.upgrade() else {
                    break;
                };

                for event in batch.events.iter().filter(|e| e.is_create()) {
                    if let Some((id, KeyKind::Meta)) = state.keys.parse(&event.kv.key) {
                        state.start_exhibit_watches(id, event.kv.mod_revision);
                    }
                }
            }
            debug!("creation watch stopped");
        });

        Ok(())
    }

    fn start_exhibit_watches(&self, id: &str, from: Revision) {
        let store = self.store.clone();
        let meta_key = self.keys.meta(id);
        let runtime_key = self.keys.runtime_info(id);
        let exhibits = self.exhibits.clone();
        let runtime_info = self.runtime_info.clone();
        let exhibit_id = id.to_string();

        self.supervisor.ensure(id, move |token| {
            vec![
                tokio::spawn(sync_loop(
                    store.clone(),
                    meta_key,
                    exhibit_id.clone(),
                    from,
                    exhibits,
                    token.clone(),
                )),
                tokio::spawn(sync_loop(
                    store,
                    runtime_key,
                    exhibit_id,
                    from,
                    runtime_info,
                    token,
                )),
            ]
        });
    }

    /// Mirror runtime info this process wrote or read.
    ///
    /// Unwatched ids stay read-through. A watch cancelled during the upsert
    /// has already dropped its entries, so the new one is dropped as well.
    fn mirror_runtime_info(&self, id: &str, revision: Revision, info: &RuntimeInfo) {
        if !self.caching || !self.supervisor.is_watching(id) {
            return;
        }
        self.runtime_info.upsert(id, revision, info.clone());
        if !self.supervisor.is_watching(id) {
            self.runtime_info.remove(id);
        }
    }

    async fn read<T: DeserializeOwned>(&self, ctx: &Context, key: &str) -> Result<Option<(Revision, T)>> {
        let kv = ctx.run(self.store.get(key)).await?;
        match kv {
            Some(kv) => Ok(Some((kv.mod_revision, serde_json::from_slice(&kv.value)?))),
            None => Ok(None),
        }
    }
}

/// Apply change events for one key to `mirror` until the key is deleted,
/// the watch fails, or `token` is cancelled. The entry is dropped on exit.
async fn sync_loop<T>(
    store: Arc<dyn CoordinationStore>,
    key: String,
    id: String,
    from: Revision,
    mirror: Mirror<T>,
    token: CancellationToken,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut watcher = match store.watch(&key, Some(from)).await {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to start watch");
            mirror.remove(&id);
            return;
        }
    };

    'outer: loop {
        let batch = tokio::select! {
            _ = token.cancelled() => break,
            batch = watcher.next() => batch,
        };
        let Some(batch) = batch else {
            warn!(key = %key, "watch closed");
            break;
        };

        for event in batch.events {
            // Keys that merely share the prefix are not ours.
            if event.kv.key != key {
                continue;
            }
            match event.kind {
                WatchEventKind::Put => match serde_json::from_slice::<T>(&event.kv.value) {
                    Ok(value) => {
                        mirror.upsert(&id, event.kv.mod_revision, value);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "undecodable value, evicting mirror entry");
                        mirror.remove(&id);
                    }
                },
                WatchEventKind::Delete => break 'outer,
            }
        }
    }

    mirror.remove(&id);
    debug!(key = %key, "watch loop exited");
}

#[async_trait]
impl DistributedState for CachedState {
    async fn create_exhibit(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()> {
        let value = serde_json::to_vec(exhibit)?;
        let key = self.keys.meta(&exhibit.id);

        let revision = ctx
            .run(self.store.create(&key, value, None))
            .await?
            .ok_or_else(|| VitrineError::AlreadyExists(format!("exhibit '{}'", exhibit.id)))?;

        if self.caching {
            self.exhibits.upsert(&exhibit.id, revision, exhibit.clone());
        }
        Ok(())
    }

    async fn get_exhibit_by_id(&self, ctx: &Context, id: &str) -> Result<Exhibit> {
        if let Some(exhibit) = self.exhibits.get(id) {
            debug!(exhibit_id = %id, "exhibit mirror hit");
            return Ok(exhibit);
        }

        self.read::<Exhibit>(ctx, &self.keys.meta(id))
            .await?
            .map(|(_, exhibit)| exhibit)
            .ok_or_else(|| VitrineError::NotFound(format!("exhibit '{}'", id)))
    }

    async fn get_all_exhibits(&self, ctx: &Context) -> Result<Vec<Exhibit>> {
        let range = ctx.run(self.store.get_prefix(self.keys.root())).await?;

        let mut exhibits = Vec::new();
        for kv in &range.kvs {
            let Some((id, KeyKind::Meta)) = self.keys.parse(&kv.key) else {
                continue;
            };
            match self.exhibits.get(id) {
                Some(exhibit) => exhibits.push(exhibit),
                None => exhibits.push(serde_json::from_slice(&kv.value)?),
            }
        }
        Ok(exhibits)
    }

    async fn delete_exhibit_by_id(&self, ctx: &Context, id: &str) -> Result<()> {
        let existed = ctx.run(self.store.delete(&self.keys.meta(id))).await?;
        ctx.run(self.store.delete(&self.keys.runtime_info(id))).await?;
        ctx.run(self.store.delete(&self.keys.last_accessed(id))).await?;

        // Loops drop their mirror entries on the way out.
        self.supervisor.cancel(id);

        if !existed {
            return Err(VitrineError::NotFound(format!("exhibit '{}'", id)));
        }
        Ok(())
    }

    async fn get_runtime_info(&self, ctx: &Context, id: &str) -> Result<RuntimeInfo> {
        if let Some(info) = self.runtime_info.get(id) {
            return Ok(info);
        }

        self.read::<RuntimeInfo>(ctx, &self.keys.runtime_info(id))
            .await?
            .map(|(_, info)| info)
            .ok_or_else(|| VitrineError::NotFound(format!("runtime info of '{}'", id)))
    }

    async fn refresh_runtime_info(&self, ctx: &Context, id: &str) -> Result<RuntimeInfo> {
        let (revision, info) = self
            .read::<RuntimeInfo>(ctx, &self.keys.runtime_info(id))
            .await?
            .ok_or_else(|| VitrineError::NotFound(format!("runtime info of '{}'", id)))?;

        self.mirror_runtime_info(id, revision, &info);
        Ok(info)
    }

    async fn set_runtime_info(&self, ctx: &Context, id: &str, info: &RuntimeInfo) -> Result<()> {
        let value = serde_json::to_vec(info)?;
        let revision = ctx
            .run(self.store.put(&self.keys.runtime_info(id), value, None))
            .await?;

        self.mirror_runtime_info(id, revision, info);
        Ok(())
    }

    async fn delete_runtime_info(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.run(self.store.delete(&self.keys.runtime_info(id))).await?;
        Ok(())
    }

    async fn get_last_accessed(&self, ctx: &Context, id: &str) -> Result<i64> {
        let kv = ctx
            .run(self.store.get(&self.keys.last_accessed(id)))
            .await?
            .ok_or_else(|| VitrineError::NotFound(format!("last accessed of '{}'", id)))?;

        std::str::from_utf8(&kv.value)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                VitrineError::Storage(format!("malformed last accessed value for '{}'", id))
            })
    }

    async fn set_last_accessed(&self, ctx: &Context, id: &str, timestamp: i64) -> Result<()> {
        ctx.run(self.store.put(
            &self.keys.last_accessed(id),
            timestamp.to_string().into_bytes(),
            None,
        ))
        .await?;
        Ok(())
    }

    async fn delete_last_accessed(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.run(self.store.delete(&self.keys.last_accessed(id))).await?;
        Ok(())
    }

    fn get_rw_lock(&self, id: &str, lock_name: &str) -> DistributedRwLock {
        DistributedRwLock::new(self.session.clone(), self.keys.lock(id, lock_name))
    }
}

impl Drop for CachedState {
    fn drop(&mut self) {
        self.supervisor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vitrine_common::model::{ExhibitStatus, Object};
    use vitrine_consistency::MemoryStore;

    fn exhibit(id: &str) -> Exhibit {
        Exhibit {
            id: id.to_string(),
            name: format!("name-{}", id),
            expose: "web".to_string(),
            objects: vec![Object {
                name: "web".to_string(),
                image: "nginx".to_string(),
                ..Default::default()
            }],
            lease: "10m".to_string(),
            ..Default::default()
        }
    }

    async fn state(caching: bool) -> Arc<CachedState> {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let session = Arc::new(Session::new(store, Duration::from_secs(30)).await.unwrap());
        CachedState::start(
            session,
            StateOptions {
                base_key: "test".to_string(),
                caching,
            },
        )
        .await
        .unwrap()
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let state = state(true).await;
        let ctx = Context::new();
        state.create_exhibit(&ctx, &exhibit("e1")).await.unwrap();

        let result = state.create_exhibit(&ctx, &exhibit("e1")).await;
        assert!(matches!(result, Err(VitrineError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let state = state(true).await;
        let result = state.get_exhibit_by_id(&Context::new(), "missing").await;
        assert!(matches!(result, Err(VitrineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_creation_starts_watches() {
        let state = state(true).await;
        state
            .create_exhibit(&Context::new(), &exhibit("e1"))
            .await
            .unwrap();

        eventually(|| state.supervisor().is_watching("e1")).await;
        assert!(state.is_exhibit_mirrored("e1"));
    }

    #[tokio::test]
    async fn test_runtime_info_write_is_visible_immediately() {
        let state = state(true).await;
        let ctx = Context::new();
        state.create_exhibit(&ctx, &exhibit("e1")).await.unwrap();

        let info = RuntimeInfo::with_status(ExhibitStatus::Starting);
        state.set_runtime_info(&ctx, "e1", &info).await.unwrap();
        assert_eq!(state.get_runtime_info(&ctx, "e1").await.unwrap(), info);

        let running = RuntimeInfo::with_status(ExhibitStatus::Running);
        state.set_runtime_info(&ctx, "e1", &running).await.unwrap();
        assert_eq!(
            state.get_runtime_info(&ctx, "e1").await.unwrap().status,
            ExhibitStatus::Running
        );
    }

    #[tokio::test]
    async fn test_last_accessed_round_trip() {
        let state = state(true).await;
        let ctx = Context::new();
        state.set_last_accessed(&ctx, "e1", 1_700_000_000).await.unwrap();
        assert_eq!(
            state.get_last_accessed(&ctx, "e1").await.unwrap(),
            1_700_000_000
        );
        state.delete_last_accessed(&ctx, "e1").await.unwrap();
        assert!(matches!(
            state.get_last_accessed(&ctx, "e1").await,
            Err(VitrineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_clears_mirror_and_watches() {
        let state = state(true).await;
        let ctx = Context::new();
        state.create_exhibit(&ctx, &exhibit("e1")).await.unwrap();
        state
            .set_runtime_info(&ctx, "e1", &RuntimeInfo::default())
            .await
            .unwrap();
        eventually(|| state.supervisor().is_watching("e1")).await;

        state.delete_exhibit_by_id(&ctx, "e1").await.unwrap();

        eventually(|| !state.is_exhibit_mirrored("e1") && !state.is_runtime_info_mirrored("e1"))
            .await;
        assert!(!state.supervisor().is_watching("e1"));
        assert!(matches!(
            state.get_exhibit_by_id(&ctx, "e1").await,
            Err(VitrineError::NotFound(_))
        ));
        assert!(matches!(
            state.delete_exhibit_by_id(&ctx, "e1").await,
            Err(VitrineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_racing_delete_leave_no_stale_entry() {
        let state = state(true).await;
        let ctx = Context::new();
        state.create_exhibit(&ctx, &exhibit("e1")).await.unwrap();
        eventually(|| state.supervisor().is_watching("e1")).await;

        let writer = {
            let state = state.clone();
            tokio::spawn(async move {
                let ctx = Context::new();
                for _ in 0..50 {
                    let info = RuntimeInfo::with_status(ExhibitStatus::Starting);
                    state.set_runtime_info(&ctx, "e1", &info).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        state.delete_exhibit_by_id(&ctx, "e1").await.unwrap();
        writer.await.unwrap();

        eventually(|| !state.is_runtime_info_mirrored("e1")).await;
        state.delete_runtime_info(&ctx, "e1").await.unwrap();
        assert!(matches!(
            state.get_runtime_info(&ctx, "e1").await,
            Err(VitrineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_without_caching_reads_store() {
        let state = state(false).await;
        let ctx = Context::new();
        state.create_exhibit(&ctx, &exhibit("e1")).await.unwrap();

        assert!(!state.is_exhibit_mirrored("e1"));
        assert_eq!(state.get_exhibit_by_id(&ctx, "e1").await.unwrap().id, "e1");
        assert_eq!(state.get_all_exhibits(&ctx).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let state = state(true).await;
        let ctx = Context::new();
        ctx.cancel();
        let result = state.get_exhibit_by_id(&ctx, "e1").await;
        assert!(matches!(result, Err(VitrineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_lock_keys_do_not_start_watches() {
        let state = state(true).await;
        let lock = state.get_rw_lock("e9", "exhibit");
        lock.lock(&Context::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!state.supervisor().is_watching("e9"));
        lock.unlock().await.unwrap();
    }
}
