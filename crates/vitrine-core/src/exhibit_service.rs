//! Exhibit definition management
//!
//! Creation validates the definition, assigns a fresh id, and writes
//! last-accessed, runtime info, and metadata in that order, rolling back the
//! earlier writes when a later one fails. Creation is serialized across
//! replicas by the global `exhibits` lock so name uniqueness holds.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use vitrine_common::model::{Exhibit, ExhibitStatus, LivecheckKind, RuntimeInfo};
use vitrine_common::{
    Context, EXHIBIT_LOCK, EXHIBITS_LOCK, GLOBAL_LOCK_ID, RUNTIME_INFO_LOCK, Result, VitrineError,
    parse_duration, unix_now,
};
use vitrine_persistence::DistributedState;

use crate::eventing::Eventing;
use crate::livecheck::http::ALLOWED_METHODS;
use crate::runtime::ContainerRuntime;
use crate::volume;

/// Check everything about a definition that does not depend on other exhibits
pub fn validate(exhibit: &Exhibit) -> Result<()> {
    let invalid = |msg: String| Err(VitrineError::Validation(msg));

    if exhibit.name.trim().is_empty() {
        return invalid("name must not be empty".to_string());
    }
    if exhibit.objects.is_empty() {
        return invalid("at least one object is required".to_string());
    }

    let mut names = HashSet::new();
    for object in &exhibit.objects {
        if object.name.trim().is_empty() {
            return invalid("object name must not be empty".to_string());
        }
        if !names.insert(object.name.as_str()) {
            return invalid(format!("duplicate object name '{}'", object.name));
        }
        if object.image.trim().is_empty() {
            return invalid(format!("object '{}' has no image", object.name));
        }
        if object.port_or_default().parse::<u16>().is_err() {
            return invalid(format!(
                "port '{}' of object '{}' is not a number",
                object.port_or_default(),
                object.name
            ));
        }

        for volume_name in object.mounts.keys() {
            let Some(declared) = object.volume(volume_name) else {
                return invalid(format!(
                    "object '{}' mounts undeclared volume '{}'",
                    object.name, volume_name
                ));
            };
            volume::check_validity(&declared.driver)?;
        }

        if let Some(livecheck) = &object.livecheck
            && livecheck.kind == LivecheckKind::Http
        {
            if let Some(method) = livecheck.config_value("method")
                && !ALLOWED_METHODS.contains(&method.to_uppercase().as_str())
            {
                return invalid(format!(
                    "livecheck method '{}' of object '{}' is not supported",
                    method, object.name
                ));
            }
            if let Some(status) = livecheck.config_value("status")
                && status.parse::<u16>().is_err()
            {
                return invalid(format!(
                    "livecheck status '{}' of object '{}' is not a status code",
                    status, object.name
                ));
            }
        }
    }

    if exhibit.expose.trim().is_empty() {
        return invalid("expose must name an object".to_string());
    }
    if exhibit.object(&exhibit.expose).is_none() {
        return invalid(format!("exposed object '{}' does not exist", exhibit.expose));
    }
    if let Some(unknown) = exhibit.order.iter().find(|n| exhibit.object(n).is_none()) {
        return invalid(format!("order references unknown object '{}'", unknown));
    }
    if let Err(e) = parse_duration(&exhibit.lease) {
        return invalid(format!("lease: {}", e));
    }

    Ok(())
}

pub struct ExhibitService {
    state: Arc<dyn DistributedState>,
    runtime: Arc<dyn ContainerRuntime>,
    eventing: Eventing,
}

impl ExhibitService {
    pub fn new(
        state: Arc<dyn DistributedState>,
        runtime: Arc<dyn ContainerRuntime>,
        eventing: Eventing,
    ) -> Self {
        Self {
            state,
            runtime,
            eventing,
        }
    }

    /// Validate and persist a new exhibit, returning its id
    pub async fn create_exhibit(&self, ctx: &Context, mut exhibit: Exhibit) -> Result<String> {
        validate(&exhibit)?;

        exhibit.id = uuid::Uuid::new_v4().to_string();
        exhibit.runtime_info = RuntimeInfo::default();
        let exhibit = &exhibit;

        self.state
            .get_rw_lock(GLOBAL_LOCK_ID, EXHIBITS_LOCK)
            .with_lock(ctx, move || self.create_locked(ctx, exhibit))
            .await?;

        self.eventing.dispatch_created(exhibit).await;
        info!(exhibit_id = %exhibit.id, name = %exhibit.name, "exhibit created");
        Ok(exhibit.id.clone())
    }

    async fn create_locked(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()> {
        let existing = self.state.get_all_exhibits(ctx).await?;
        if existing.iter().any(|e| e.name == exhibit.name) {
            return Err(VitrineError::Validation(format!(
                "an exhibit named '{}' already exists",
                exhibit.name
            )));
        }

        for object in &exhibit.objects {
            ctx.run(self.runtime.ensure_image(&object.image_reference()))
                .await?;
        }

        let id = exhibit.id.as_str();
        self.state.set_last_accessed(ctx, id, unix_now()).await?;

        let info = RuntimeInfo::with_status(ExhibitStatus::NotCreated);
        if let Err(e) = self.state.set_runtime_info(ctx, id, &info).await {
            warn!(exhibit_id = %id, error = %e, "failed to store runtime info, reverting");
            self.rollback(id, false).await;
            return Err(e);
        }

        if let Err(e) = self.state.create_exhibit(ctx, exhibit).await {
            warn!(exhibit_id = %id, error = %e, "failed to store exhibit, reverting");
            self.rollback(id, true).await;
            return Err(e);
        }

        Ok(())
    }

    async fn rollback(&self, id: &str, runtime_info_written: bool) {
        let ctx = Context::detached();
        if runtime_info_written
            && let Err(e) = self.state.delete_runtime_info(&ctx, id).await
        {
            warn!(exhibit_id = %id, error = %e, "rollback of runtime info failed");
        }
        if let Err(e) = self.state.delete_last_accessed(&ctx, id).await {
            warn!(exhibit_id = %id, error = %e, "rollback of last accessed failed");
        }
    }

    async fn hydrate(&self, ctx: &Context, mut exhibit: Exhibit) -> Result<Exhibit> {
        exhibit.runtime_info = match self.state.get_runtime_info(ctx, &exhibit.id).await {
            Ok(info) => info,
            Err(VitrineError::NotFound(_)) => RuntimeInfo::default(),
            Err(e) => return Err(e),
        };
        match self.state.get_last_accessed(ctx, &exhibit.id).await {
            Ok(timestamp) => {
                exhibit.runtime_info.last_accessed =
                    exhibit.runtime_info.last_accessed.max(timestamp)
            }
            Err(VitrineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(exhibit)
    }

    /// Exhibit with its runtime info and last-accessed time attached
    pub async fn get_exhibit_by_id(&self, ctx: &Context, id: &str) -> Result<Exhibit> {
        let exhibit = self.state.get_exhibit_by_id(ctx, id).await?;
        self.hydrate(ctx, exhibit).await
    }

    pub async fn get_all_exhibits(&self, ctx: &Context) -> Result<Vec<Exhibit>> {
        let mut hydrated = Vec::new();
        for exhibit in self.state.get_all_exhibits(ctx).await? {
            hydrated.push(self.hydrate(ctx, exhibit).await?);
        }
        hydrated.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hydrated)
    }

    /// Remove a stopped or never-started exhibit
    ///
    /// The status check and the deletes run under the runtime info lock, so a
    /// concurrent start either sees the exhibit gone or keeps it alive.
    pub async fn delete_exhibit(&self, ctx: &Context, id: &str) -> Result<()> {
        let exhibit = self.get_exhibit_by_id(ctx, id).await?;
        let exhibit = &exhibit;
        let runtime_lock = self.state.get_rw_lock(id, RUNTIME_INFO_LOCK);
        let runtime_lock = &runtime_lock;

        self.state
            .get_rw_lock(id, EXHIBIT_LOCK)
            .with_lock(ctx, move || {
                runtime_lock.with_lock(ctx, move || async move {
                    let status = match self.state.refresh_runtime_info(ctx, id).await {
                        Ok(info) => info.status,
                        Err(VitrineError::NotFound(_)) => ExhibitStatus::NotCreated,
                        Err(e) => return Err(e),
                    };
                    if !matches!(status, ExhibitStatus::NotCreated | ExhibitStatus::Stopped) {
                        return Err(VitrineError::IllegalState(format!(
                            "cannot delete exhibit '{}' while {}",
                            id, status
                        )));
                    }
                    self.state.delete_exhibit_by_id(ctx, id).await
                })
            })
            .await?;

        self.eventing.dispatch_deleted(exhibit).await;
        info!(exhibit_id = %id, "exhibit deleted");
        Ok(())
    }

    /// Refresh the lease of a running exhibit
    pub async fn renew_lease(&self, ctx: &Context, id: &str) -> Result<()> {
        self.state.set_last_accessed(ctx, id, unix_now()).await?;
        debug!(exhibit_id = %id, "lease renewed");

        let exhibit = self.get_exhibit_by_id(ctx, id).await?;
        self.eventing.dispatch_lease_renewed(&exhibit).await;
        Ok(())
    }
}
