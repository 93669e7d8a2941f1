//! Request-driven lifecycle dispatch
//!
//! Each request to an exhibit is answered from its current status. Requests
//! to a not-created or stopped exhibit start it in the background; the
//! provisioner's claim makes sure only one start runs per exhibit, and the
//! local in-flight set avoids spawning redundant start tasks on this replica.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vitrine_common::model::{Exhibit, ExhibitStatus};
use vitrine_common::{Context, Result};

use crate::exhibit_service::ExhibitService;
use crate::provisioner::ApplicationProvisioner;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Running; forward the request
    Proxy(Exhibit),
    /// Starting or just triggered; show the waiting view
    Waiting(Exhibit),
    /// Stopping; reject without provisioning
    Unavailable(Exhibit),
}

/// Removes the exhibit from the in-flight set when the start task ends
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

pub struct LifecycleOrchestrator {
    exhibits: Arc<ExhibitService>,
    provisioner: Arc<dyn ApplicationProvisioner>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl LifecycleOrchestrator {
    pub fn new(exhibits: Arc<ExhibitService>, provisioner: Arc<dyn ApplicationProvisioner>) -> Self {
        Self {
            exhibits,
            provisioner,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn dispatch(&self, ctx: &Context, exhibit_id: &str) -> Result<Dispatch> {
        let exhibit = self.exhibits.get_exhibit_by_id(ctx, exhibit_id).await?;

        Ok(match exhibit.runtime_info.status {
            ExhibitStatus::Running => Dispatch::Proxy(exhibit),
            ExhibitStatus::Stopping => Dispatch::Unavailable(exhibit),
            ExhibitStatus::Starting => Dispatch::Waiting(exhibit),
            ExhibitStatus::NotCreated | ExhibitStatus::Stopped => {
                self.trigger_start(exhibit_id);
                Dispatch::Waiting(exhibit)
            }
        })
    }

    /// Start provisioning detached from the triggering request.
    ///
    /// Returns whether a start task was spawned.
    pub fn trigger_start(&self, exhibit_id: &str) -> bool {
        if !self.in_flight.lock().insert(exhibit_id.to_string()) {
            debug!(exhibit_id = %exhibit_id, "start already in flight");
            return false;
        }

        let guard = InFlight {
            set: self.in_flight.clone(),
            id: exhibit_id.to_string(),
        };
        let provisioner = self.provisioner.clone();
        tokio::spawn(async move {
            let ctx = Context::detached();
            match provisioner.start_application(&ctx, &guard.id).await {
                Ok(()) => debug!(exhibit_id = %guard.id, "start task finished"),
                Err(e) => warn!(exhibit_id = %guard.id, error = %e, "start task failed"),
            }
        });
        true
    }

    pub fn is_starting_locally(&self, exhibit_id: &str) -> bool {
        self.in_flight.lock().contains(exhibit_id)
    }

    /// Refresh the lease after a proxied response; failures are only logged
    pub fn touch(&self, exhibit_id: &str) {
        let exhibits = self.exhibits.clone();
        let id = exhibit_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = exhibits.renew_lease(&Context::detached(), &id).await {
                debug!(exhibit_id = %id, error = %e, "lease refresh failed");
            }
        });
    }

    /// Explicit stop: stop the containers, then remove them
    pub async fn stop(&self, ctx: &Context, exhibit_id: &str) -> Result<()> {
        self.provisioner.stop_application(ctx, exhibit_id).await?;
        self.provisioner.cleanup_application(ctx, exhibit_id).await?;
        info!(exhibit_id = %exhibit_id, "exhibit stopped on request");
        Ok(())
    }
}
