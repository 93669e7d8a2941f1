//! Store sessions
//!
//! A session owns one lease and keeps it alive in the background. Keys written
//! under the session's lease (lock keys in particular) disappear once the
//! session is closed or its holder stops renewing, so a crashed process never
//! holds a lock forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vitrine_common::Result;

use crate::store::{CoordinationStore, LeaseId};

pub struct Session {
    store: Arc<dyn CoordinationStore>,
    lease: LeaseId,
    ttl: Duration,
    /// Cancelled when the session is closed or the lease is lost
    done: CancellationToken,
    keep_alive: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Grant a lease with `ttl` and start renewing it every third of the ttl
    pub async fn new(store: Arc<dyn CoordinationStore>, ttl: Duration) -> Result<Self> {
        let lease = store.grant_lease(ttl).await?;
        let done = CancellationToken::new();

        let renew_every = (ttl / 3).max(Duration::from_millis(10));
        let task_store = store.clone();
        let task_done = done.clone();
        let keep_alive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renew_every);
            loop {
                tokio::select! {
                    _ = task_done.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = task_store.keep_alive(lease).await {
                            warn!(lease, error = %e, "session lease lost");
                            task_done.cancel();
                            break;
                        }
                    }
                }
            }
        });

        debug!(lease, ttl_ms = ttl.as_millis() as u64, "session established");

        Ok(Self {
            store,
            lease,
            ttl,
            done,
            keep_alive,
        })
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Token cancelled when the session ends for any reason
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Stop renewing and revoke the lease, releasing every key attached to it
    pub async fn close(&self) -> Result<()> {
        self.done.cancel();
        self.keep_alive.abort();
        self.store.revoke_lease(self.lease).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.done.cancel();
        self.keep_alive.abort();
    }
}
