//! Exhibit and object address resolution
//!
//! Addresses come from the container runtime and are cached by container
//! host name in a bounded [`EvictionCache`]. Public lookups are gated on the
//! exhibit being `running`; livechecks use the ungated [`ApplicationResolver::lookup_object`]
//! because they run while the exhibit is still `starting`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vitrine_common::model::{Exhibit, ExhibitStatus, Object};
use vitrine_common::{Context, EvictionCache, Result, VitrineError, container_name};
use vitrine_persistence::DistributedState;

use crate::runtime::ContainerRuntime;

#[async_trait]
pub trait ApplicationResolver: Send + Sync {
    /// `host:port` of the exposed object of a running exhibit
    async fn resolve_application(&self, ctx: &Context, exhibit_id: &str) -> Result<String>;

    /// Host of `object`; `NotRunning` unless the exhibit is running
    async fn resolve_exhibit_object(&self, exhibit: &Exhibit, object: &Object) -> Result<String>;

    /// Host of `object` regardless of the exhibit status
    async fn lookup_object(&self, exhibit: &Exhibit, object: &Object) -> Result<String>;

    /// Drop any cached address for `hostname`
    fn invalidate(&self, hostname: &str);
}

pub struct ContainerResolver {
    state: Arc<dyn DistributedState>,
    runtime: Arc<dyn ContainerRuntime>,
    cache: EvictionCache<String, String>,
}

impl ContainerResolver {
    pub fn new(
        state: Arc<dyn DistributedState>,
        runtime: Arc<dyn ContainerRuntime>,
        cache_capacity: u64,
    ) -> Self {
        Self {
            state,
            runtime,
            cache: EvictionCache::new(cache_capacity),
        }
    }

    pub fn cache(&self) -> &EvictionCache<String, String> {
        &self.cache
    }
}

#[async_trait]
impl ApplicationResolver for ContainerResolver {
    async fn resolve_application(&self, ctx: &Context, exhibit_id: &str) -> Result<String> {
        let mut exhibit = self.state.get_exhibit_by_id(ctx, exhibit_id).await?;
        exhibit.runtime_info = self.state.get_runtime_info(ctx, exhibit_id).await?;

        if exhibit.runtime_info.status != ExhibitStatus::Running {
            return Err(VitrineError::NotRunning(exhibit.id));
        }

        let hostname = exhibit.runtime_info.hostname.clone();
        if let Some(address) = self.cache.get(&hostname) {
            debug!(exhibit_id = %exhibit_id, hostname = %hostname, "resolver cache hit");
            return Ok(address);
        }

        let expose = exhibit.expose_object()?;
        let host = self.resolve_exhibit_object(&exhibit, expose).await?;
        let address = format!("{}:{}", host, expose.port_or_default());

        debug!(exhibit_id = %exhibit_id, hostname = %hostname, address = %address, "resolver cache miss");
        self.cache.put(hostname, address.clone());
        Ok(address)
    }

    async fn resolve_exhibit_object(&self, exhibit: &Exhibit, object: &Object) -> Result<String> {
        if exhibit.runtime_info.status != ExhibitStatus::Running {
            return Err(VitrineError::NotRunning(exhibit.id.clone()));
        }

        self.lookup_object(exhibit, object).await
    }

    async fn lookup_object(&self, exhibit: &Exhibit, object: &Object) -> Result<String> {
        let name = container_name(&exhibit.name, &object.name);
        let info = self
            .runtime
            .inspect_container(&name)
            .await?
            .ok_or_else(|| VitrineError::NotFound(format!("container '{}'", name)))?;

        if !info.running {
            return Err(VitrineError::Transient(format!(
                "container '{}' is not running",
                name
            )));
        }

        info.address.ok_or_else(|| {
            VitrineError::Transient(format!("container '{}' has no network address", name))
        })
    }

    fn invalidate(&self, hostname: &str) {
        self.cache.remove(&hostname.to_string());
    }
}
