//! Distributed read/write lock
//!
//! Every contender creates a unique key under the lock prefix, attached to
//! its session lease:
//!
//! ```text
//! {prefix}/write/{uuid}   exclusive holders and waiters
//! {prefix}/read/{uuid}    shared holders and waiters
//! ```
//!
//! Contenders are ordered by the create revision of their key. A writer owns
//! the lock once no key with a lower revision remains; a reader once no
//! *write* key with a lower revision remains. Waiting is done by watching the
//! closest blocking key until it is deleted.
//!
//! A key whose owner goes away without releasing it (a dropped waiter, a
//! dropped `with_lock` future, or a dropped handle) is deleted in the
//! background, so an abandoned contender never blocks later ones.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use vitrine_common::{Context, Result, VitrineError};

use crate::session::Session;
use crate::store::{CoordinationStore, KeyValue, Revision};

const WRITE_SEGMENT: &str = "write";
const READ_SEGMENT: &str = "read";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

impl Mode {
    fn segment(self) -> &'static str {
        match self {
            Mode::Read => READ_SEGMENT,
            Mode::Write => WRITE_SEGMENT,
        }
    }
}

/// Deletes its key in the background when dropped while armed
struct KeyGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
    armed: bool,
}

impl KeyGuard {
    fn new(store: Arc<dyn CoordinationStore>, key: String) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match store.delete(&key).await {
                        Ok(_) => debug!(key = %key, "abandoned lock key deleted"),
                        Err(e) => warn!(key = %key, error = %e, "failed to delete abandoned lock key"),
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "no runtime to delete abandoned lock key, it expires with the session lease")
            }
        }
    }
}

struct Held {
    guard: KeyGuard,
    mode: Mode,
}

/// Abandons the held key if a `with_lock` section is dropped before it ends
struct SectionGuard<'a> {
    lock: &'a DistributedRwLock,
    armed: bool,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.lock.held.lock().take().is_some() {
            warn!(prefix = %self.lock.prefix, "lock section dropped before release");
        }
    }
}

pub struct DistributedRwLock {
    session: Arc<Session>,
    prefix: String,
    held: Mutex<Option<Held>>,
}

impl DistributedRwLock {
    pub fn new(session: Arc<Session>, prefix: impl Into<String>) -> Self {
        Self {
            session,
            prefix: prefix.into(),
            held: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn store(&self) -> &Arc<dyn CoordinationStore> {
        self.session.store()
    }

    /// Acquire exclusively, blocking until granted or `ctx` is cancelled
    pub async fn lock(&self, ctx: &Context) -> Result<()> {
        self.acquire(ctx, Mode::Write).await
    }

    /// Acquire shared, blocking until granted or `ctx` is cancelled
    pub async fn rlock(&self, ctx: &Context) -> Result<()> {
        self.acquire(ctx, Mode::Read).await
    }

    pub async fn unlock(&self) -> Result<()> {
        self.release(Mode::Write).await
    }

    pub async fn runlock(&self) -> Result<()> {
        self.release(Mode::Read).await
    }

    /// Run `f` while holding the exclusive lock.
    ///
    /// A release failure is returned even when `f` succeeded.
    pub async fn with_lock<T, F, Fut>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.lock(ctx).await?;
        let mut section = SectionGuard {
            lock: self,
            armed: true,
        };
        let result = f().await;
        section.armed = false;
        let released = self.unlock().await;
        Self::combine(result, released)
    }

    /// Run `f` while holding the shared lock
    pub async fn with_rlock<T, F, Fut>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.rlock(ctx).await?;
        let mut section = SectionGuard {
            lock: self,
            armed: true,
        };
        let result = f().await;
        section.armed = false;
        let released = self.runlock().await;
        Self::combine(result, released)
    }

    fn combine<T>(result: Result<T>, released: Result<()>) -> Result<T> {
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!(error = %release_error, "lock release failed after operation error");
                Err(e)
            }
        }
    }

    async fn acquire(&self, ctx: &Context, mode: Mode) -> Result<()> {
        if self.held.lock().is_some() {
            return Err(VitrineError::LockFailure(format!(
                "lock '{}' is already held by this handle",
                self.prefix
            )));
        }
        if self.session.is_closed() {
            return Err(VitrineError::LockFailure(format!(
                "session for lock '{}' is closed",
                self.prefix
            )));
        }

        let key = format!("{}/{}/{}", self.prefix, mode.segment(), uuid::Uuid::new_v4());
        let revision = self
            .store()
            .put(&key, Vec::new(), Some(self.session.lease()))
            .await
            .map_err(|e| VitrineError::LockFailure(format!("create lock key '{}': {}", key, e)))?;

        let mut guard = KeyGuard::new(self.store().clone(), key.clone());

        match ctx.run(self.wait_for_turn(&key, revision, mode)).await {
            Ok(()) => {
                *self.held.lock() = Some(Held { guard, mode });
                debug!(prefix = %self.prefix, ?mode, "lock acquired");
                Ok(())
            }
            Err(e) => {
                guard.disarm();
                if let Err(cleanup) = self.store().delete(&key).await {
                    warn!(key = %key, error = %cleanup, "failed to withdraw lock key");
                }
                Err(e)
            }
        }
    }

    async fn wait_for_turn(&self, key: &str, own_revision: Revision, mode: Mode) -> Result<()> {
        let scan_prefix = format!("{}/", self.prefix);
        let write_prefix = format!("{}/{}/", self.prefix, WRITE_SEGMENT);

        loop {
            let range = self
                .store()
                .get_prefix(&scan_prefix)
                .await
                .map_err(|e| VitrineError::LockFailure(e.to_string()))?;

            if !range.kvs.iter().any(|kv| kv.key == key) {
                return Err(VitrineError::LockFailure(format!(
                    "lock key '{}' vanished while waiting",
                    key
                )));
            }

            let blocker: Option<&KeyValue> = range
                .kvs
                .iter()
                .filter(|kv| kv.create_revision < own_revision)
                .filter(|kv| mode == Mode::Write || kv.key.starts_with(&write_prefix))
                .max_by_key(|kv| kv.create_revision);

            let Some(blocker) = blocker else {
                return Ok(());
            };

            self.wait_deleted(&blocker.key, range.revision + 1).await?;
        }
    }

    async fn wait_deleted(&self, key: &str, from_revision: Revision) -> Result<()> {
        let mut watcher = self
            .store()
            .watch(key, Some(from_revision))
            .await
            .map_err(|e| VitrineError::LockFailure(e.to_string()))?;

        while let Some(batch) = watcher.next().await {
            if batch.events.iter().any(|e| e.kv.key == key && e.is_delete()) {
                return Ok(());
            }
        }

        Err(VitrineError::LockFailure(format!(
            "watch on '{}' closed while waiting",
            key
        )))
    }

    async fn release(&self, mode: Mode) -> Result<()> {
        let held = {
            let mut guard = self.held.lock();
            match guard.as_ref() {
                Some(h) if h.mode == mode => guard.take(),
                Some(_) => {
                    return Err(VitrineError::LockFailure(format!(
                        "lock '{}' is held in a different mode",
                        self.prefix
                    )));
                }
                None => None,
            }
        };

        let Some(mut held) = held else {
            return Err(VitrineError::LockFailure(format!(
                "lock '{}' is not held",
                self.prefix
            )));
        };

        held.guard.disarm();
        let key = held.guard.key.as_str();
        let existed = self
            .store()
            .delete(key)
            .await
            .map_err(|e| VitrineError::LockFailure(format!("release '{}': {}", key, e)))?;

        if !existed {
            return Err(VitrineError::LockFailure(format!(
                "lock key '{}' was lost before release",
                key
            )));
        }

        debug!(prefix = %self.prefix, ?mode, "lock released");
        Ok(())
    }
}
