//! Explicit construction of the control plane
//!
//! Components are built leaf to root: store, session, distributed state,
//! event bus, resolver, livechecks, provisioner, exhibit service,
//! orchestrator, proxy, and the cleanup scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::info;
use vitrine_consistency::{CoordinationStore, MemoryStore, Session};
use vitrine_core::{
    ApplicationProvisioner, ApplicationResolver, BroadcastBus, CleanupScheduler,
    ContainerProvisioner, ContainerResolver, ContainerRuntime, EnvironmentTemplate, Eventing,
    ExecLivecheck, ExhibitProxy, ExhibitService, HttpLivecheck, LifecycleOrchestrator, Livechecks,
    Rewriter,
};
use vitrine_persistence::{CachedState, DistributedState, StateOptions};

use crate::config::Configuration;
use crate::model::AppState;
use crate::model::app_state::EXHIBIT_ROUTE;
use crate::route::PathPattern;

const LEASE_REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Everything `main` needs to serve and to shut down
pub struct Components {
    pub app_state: Arc<AppState>,
    pub state: Arc<CachedState>,
    pub session: Arc<Session>,
    pub cleanup: Arc<CleanupScheduler>,
}

/// Wire the control plane against `runtime`
pub async fn build(
    configuration: &Configuration,
    runtime: Arc<dyn ContainerRuntime>,
) -> anyhow::Result<Components> {
    let hostname = configuration.hostname();
    let public_port = configuration.public_port()?;

    let store: Arc<dyn CoordinationStore> =
        Arc::new(MemoryStore::new().with_lease_reaper(LEASE_REAPER_INTERVAL));
    let session = Arc::new(
        Session::new(store, configuration.session_ttl()?)
            .await
            .context("failed to open coordination session")?,
    );

    let state = CachedState::start(
        session.clone(),
        StateOptions {
            base_key: configuration.base_key(),
            caching: true,
        },
    )
    .await
    .context("failed to start distributed state")?;
    let state_dyn: Arc<dyn DistributedState> = state.clone();

    let bus = Arc::new(BroadcastBus::default());
    let eventing = Eventing::new(bus.clone());

    let resolver: Arc<dyn ApplicationResolver> = Arc::new(ContainerResolver::new(
        state_dyn.clone(),
        runtime.clone(),
        configuration.resolver_cache_capacity(),
    ));
    let livechecks = Livechecks::new(
        Arc::new(HttpLivecheck::new(
            resolver.clone(),
            configuration.livecheck_request_timeout()?,
        )?),
        Arc::new(ExecLivecheck::new(runtime.clone())),
    );

    let provisioner: Arc<dyn ApplicationProvisioner> = Arc::new(ContainerProvisioner::new(
        state_dyn.clone(),
        runtime.clone(),
        resolver.clone(),
        livechecks,
        EnvironmentTemplate::new(&hostname, public_port),
        eventing.clone(),
        configuration.livecheck_timeout()?,
    ));
    let exhibits = Arc::new(ExhibitService::new(state_dyn, runtime, eventing.clone()));
    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        exhibits.clone(),
        provisioner.clone(),
    ));
    let proxy = Arc::new(ExhibitProxy::new(
        resolver,
        Rewriter::new(&hostname, public_port),
        configuration.proxy_timeout()?,
    )?);
    let cleanup = Arc::new(CleanupScheduler::new(
        exhibits.clone(),
        provisioner,
        eventing,
    ));

    let app_state = Arc::new(AppState {
        exhibits,
        orchestrator,
        proxy,
        events: bus,
        session: session.clone(),
        exhibit_route: PathPattern::compile(EXHIBIT_ROUTE)?,
        authority: format!("{}:{}", hostname, public_port),
    });

    info!(authority = %app_state.authority, "control plane wired");
    Ok(Components {
        app_state,
        state,
        session,
        cleanup,
    })
}
