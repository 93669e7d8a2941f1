//! Container-backed application lifecycle
//!
//! Start runs in two locked phases. The starting phase claims the exhibit
//! under the `runtime_info` write lock, re-reading status from the store so
//! only one caller across all replicas moves it to `starting`. The running
//! phase holds the `exhibit` read lock and the `runtime_info` write lock
//! while every object goes through clean, create, start, livecheck, ready.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, error, info, warn};
use vitrine_common::model::{Exhibit, ExhibitStatus, Object, RuntimeInfo, StartingStep};
use vitrine_common::{
    Context, EXHIBIT_LOCK, RUNTIME_INFO_LOCK, Result, VitrineError, container_name, unix_now,
};
use vitrine_persistence::DistributedState;

use crate::eventing::Eventing;
use crate::livecheck::{self, Livechecks};
use crate::resolver::ApplicationResolver;
use crate::runtime::{ContainerRuntime, ContainerSpec, EXHIBIT_ID_LABEL, OBJECT_LABEL};
use crate::template::EnvironmentTemplate;
use crate::volume;

#[async_trait]
pub trait ApplicationProvisioner: Send + Sync {
    /// Bring every object of the exhibit up; a no-op when already starting or running
    async fn start_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()>;

    /// Stop the exhibit's containers; a no-op when already stopped
    async fn stop_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()>;

    /// Remove the stopped exhibit's containers and network
    async fn cleanup_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()>;
}

/// Counts steps across all objects of one provisioning run
struct StepTracker<'a> {
    eventing: &'a Eventing,
    exhibit_id: &'a str,
    current: usize,
    total: usize,
}

impl StepTracker<'_> {
    async fn report(&mut self, object: &str, step: StartingStep, error: Option<&VitrineError>) {
        self.current += 1;
        self.eventing
            .dispatch_starting_step(
                self.exhibit_id,
                object,
                step,
                error,
                self.current,
                self.total,
            )
            .await;
    }

    /// Run one step, reporting it together with its error if it fails
    async fn step<T, F>(&mut self, object: &str, step: StartingStep, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match fut.await {
            Ok(value) => {
                self.report(object, step, None).await;
                Ok(value)
            }
            Err(e) => {
                self.report(object, step, Some(&e)).await;
                Err(e)
            }
        }
    }
}

pub struct ContainerProvisioner {
    state: Arc<dyn DistributedState>,
    runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<dyn ApplicationResolver>,
    livechecks: Livechecks,
    template: EnvironmentTemplate,
    eventing: Eventing,
    livecheck_timeout: Duration,
}

impl ContainerProvisioner {
    pub fn new(
        state: Arc<dyn DistributedState>,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<dyn ApplicationResolver>,
        livechecks: Livechecks,
        template: EnvironmentTemplate,
        eventing: Eventing,
        livecheck_timeout: Duration,
    ) -> Self {
        Self {
            state,
            runtime,
            resolver,
            livechecks,
            template,
            eventing,
            livecheck_timeout,
        }
    }

    /// Claim the exhibit for provisioning. Returns whether this caller owns the run.
    async fn claim(&self, ctx: &Context, exhibit_id: &str) -> Result<bool> {
        let mut info = self.state.refresh_runtime_info(ctx, exhibit_id).await?;
        match info.status {
            ExhibitStatus::Starting | ExhibitStatus::Running => {
                debug!(exhibit_id = %exhibit_id, status = %info.status, "start skipped");
                return Ok(false);
            }
            status if !status.can_start() => {
                return Err(VitrineError::IllegalState(format!(
                    "cannot start exhibit '{}' while {}",
                    exhibit_id, status
                )));
            }
            _ => {}
        }

        let now = unix_now();
        info.status = ExhibitStatus::Starting;
        info.related_containers.clear();
        info.last_accessed = now;
        self.state.set_runtime_info(ctx, exhibit_id, &info).await?;
        self.state.set_last_accessed(ctx, exhibit_id, now).await?;

        info!(exhibit_id = %exhibit_id, "exhibit starting");
        Ok(true)
    }

    async fn run(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()> {
        let mut related = Vec::new();
        match self.provision(ctx, exhibit, &mut related).await {
            Ok(hostname) => {
                let now = unix_now();
                let info = RuntimeInfo {
                    status: ExhibitStatus::Running,
                    last_accessed: now,
                    hostname: hostname.clone(),
                    related_containers: related,
                };
                self.state.set_runtime_info(ctx, &exhibit.id, &info).await?;
                self.state.set_last_accessed(ctx, &exhibit.id, now).await?;
                self.resolver.invalidate(&hostname);

                let mut started = exhibit.clone();
                started.runtime_info = info;
                self.eventing.dispatch_started(&started).await;

                counter!("vitrine_provisioning_total", "outcome" => "success").increment(1);
                info!(exhibit_id = %exhibit.id, hostname = %hostname, "exhibit running");
                Ok(())
            }
            Err(e) => {
                counter!("vitrine_provisioning_total", "outcome" => "failure").increment(1);
                error!(exhibit_id = %exhibit.id, error = %e, "provisioning failed, reverting to stopped");
                self.abandon(exhibit, &related).await;
                Err(e)
            }
        }
    }

    /// Stop what was brought up and mark the exhibit stopped
    async fn abandon(&self, exhibit: &Exhibit, related: &[String]) {
        for name in related {
            if let Err(e) = self.runtime.stop_container(name).await {
                warn!(exhibit_id = %exhibit.id, container = %name, error = %e, "failed to stop container of failed start");
            }
        }

        // The triggering context may be the reason for the failure.
        let ctx = Context::detached();
        let info = RuntimeInfo {
            status: ExhibitStatus::Stopped,
            last_accessed: unix_now(),
            ..Default::default()
        };
        if let Err(e) = self.state.set_runtime_info(&ctx, &exhibit.id, &info).await {
            error!(exhibit_id = %exhibit.id, error = %e, "failed to revert runtime info");
        }
    }

    /// Bring up every object in order; returns the exposed container's host name
    async fn provision(
        &self,
        ctx: &Context,
        exhibit: &Exhibit,
        related: &mut Vec<String>,
    ) -> Result<String> {
        let objects = exhibit.ordered_objects()?;
        let expose = exhibit.expose_object()?;

        ctx.run(self.runtime.ensure_network(&exhibit.name)).await?;

        let mut steps = StepTracker {
            eventing: &self.eventing,
            exhibit_id: &exhibit.id,
            current: 0,
            total: objects.len() * StartingStep::ALL.len(),
        };

        for object in objects {
            let name = container_name(&exhibit.name, &object.name);
            debug!(exhibit_id = %exhibit.id, container = %name, "provisioning object");

            steps
                .step(&object.name, StartingStep::Clean, self.clean(ctx, &name))
                .await?;

            let spec = self.container_spec(exhibit, object);
            steps
                .step(&object.name, StartingStep::Create, async {
                    let spec = spec?;
                    ctx.run(self.runtime.create_container(&spec)).await
                })
                .await?;
            related.push(name.clone());

            steps
                .step(
                    &object.name,
                    StartingStep::Start,
                    ctx.run(self.runtime.start_container(&name)),
                )
                .await?;

            steps
                .step(
                    &object.name,
                    StartingStep::Livecheck,
                    livecheck::poll(ctx, &self.livechecks, exhibit, object, self.livecheck_timeout),
                )
                .await?;

            steps.report(&object.name, StartingStep::Ready, None).await;
        }

        Ok(container_name(&exhibit.name, &expose.name))
    }

    /// Remove a stale container left by an earlier run
    async fn clean(&self, ctx: &Context, name: &str) -> Result<()> {
        let Some(existing) = ctx.run(self.runtime.inspect_container(name)).await? else {
            return Ok(());
        };

        warn!(container = %name, running = existing.running, "removing stale container");
        if existing.running {
            ctx.run(self.runtime.stop_container(name)).await?;
        }
        ctx.run(self.runtime.remove_container(name)).await?;
        Ok(())
    }

    fn container_spec(&self, exhibit: &Exhibit, object: &Object) -> Result<ContainerSpec> {
        let name = container_name(&exhibit.name, &object.name);

        let binds = object
            .mounts
            .iter()
            .map(|(volume_name, target)| {
                let volume = object.volume(volume_name).ok_or_else(|| {
                    VitrineError::Fatal(format!(
                        "mount references unknown volume '{}' of object '{}'",
                        volume_name, object.name
                    ))
                })?;
                let source = volume::provision_storage(&volume.driver)?;
                Ok(format!("{}:{}", source, target))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ContainerSpec {
            name: name.clone(),
            image: object.image_reference(),
            env: self.template.fill(exhibit, object)?,
            hostname: name,
            network: exhibit.name.clone(),
            aliases: vec![object.name.clone()],
            binds,
            labels: [
                (EXHIBIT_ID_LABEL.to_string(), exhibit.id.clone()),
                (OBJECT_LABEL.to_string(), object.name.clone()),
            ]
            .into(),
        })
    }

    async fn stop_locked(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()> {
        let mut info = self.state.refresh_runtime_info(ctx, &exhibit.id).await?;
        match info.status {
            ExhibitStatus::Stopped => {
                debug!(exhibit_id = %exhibit.id, "stop skipped, already stopped");
                return Ok(());
            }
            ExhibitStatus::Running => {}
            status => {
                return Err(VitrineError::IllegalState(format!(
                    "cannot stop exhibit '{}' while {}",
                    exhibit.id, status
                )));
            }
        }

        info.status = ExhibitStatus::Stopping;
        self.state.set_runtime_info(ctx, &exhibit.id, &info).await?;
        info!(exhibit_id = %exhibit.id, "exhibit stopping");

        for name in &info.related_containers {
            match ctx.run(self.runtime.stop_container(name)).await {
                Ok(true) => debug!(container = %name, "container stopped"),
                Ok(false) => debug!(container = %name, "container already gone"),
                Err(e) => {
                    error!(exhibit_id = %exhibit.id, container = %name, error = %e, "failed to stop container");
                    info.status = ExhibitStatus::Running;
                    if let Err(revert) = self
                        .state
                        .set_runtime_info(&Context::detached(), &exhibit.id, &info)
                        .await
                    {
                        error!(exhibit_id = %exhibit.id, error = %revert, "failed to revert runtime info");
                    }
                    return Err(e);
                }
            }
        }

        info.status = ExhibitStatus::Stopped;
        self.state.set_runtime_info(ctx, &exhibit.id, &info).await?;
        self.resolver.invalidate(&info.hostname);

        let mut stopped = exhibit.clone();
        stopped.runtime_info = info;
        self.eventing.dispatch_stopping(&stopped).await;

        info!(exhibit_id = %exhibit.id, "exhibit stopped");
        Ok(())
    }

    async fn cleanup_locked(&self, ctx: &Context, exhibit: &Exhibit) -> Result<()> {
        let mut info = self.state.refresh_runtime_info(ctx, &exhibit.id).await?;
        if info.status != ExhibitStatus::Stopped {
            return Err(VitrineError::IllegalState(format!(
                "cannot clean up exhibit '{}' while {}",
                exhibit.id, info.status
            )));
        }

        for name in &info.related_containers {
            if !ctx.run(self.runtime.remove_container(name)).await? {
                debug!(container = %name, "container already removed");
            }
        }
        ctx.run(self.runtime.remove_network(&exhibit.name)).await?;

        info.related_containers.clear();
        info.hostname.clear();
        self.state.set_runtime_info(ctx, &exhibit.id, &info).await?;

        info!(exhibit_id = %exhibit.id, "exhibit cleaned up");
        Ok(())
    }
}

#[async_trait]
impl ApplicationProvisioner for ContainerProvisioner {
    async fn start_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()> {
        let exhibit = self.state.get_exhibit_by_id(ctx, exhibit_id).await?;
        let runtime_lock = self.state.get_rw_lock(exhibit_id, RUNTIME_INFO_LOCK);

        let claimed = runtime_lock
            .with_lock(ctx, move || self.claim(ctx, exhibit_id))
            .await?;
        if !claimed {
            return Ok(());
        }

        let exhibit_lock = self.state.get_rw_lock(exhibit_id, EXHIBIT_LOCK);
        let runtime_lock = &runtime_lock;
        let exhibit = &exhibit;
        let result = exhibit_lock
            .with_rlock(ctx, move || {
                runtime_lock.with_lock(ctx, move || self.run(ctx, exhibit))
            })
            .await;

        // A lock failure before `run` leaves the claim in place.
        if let Err(VitrineError::LockFailure(_) | VitrineError::Cancelled) = &result {
            let info = self
                .state
                .refresh_runtime_info(&Context::detached(), exhibit_id)
                .await;
            if let Ok(info) = info
                && info.status == ExhibitStatus::Starting
            {
                self.abandon(exhibit, &info.related_containers).await;
            }
        }
        result
    }

    async fn stop_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()> {
        let exhibit = self.state.get_exhibit_by_id(ctx, exhibit_id).await?;
        let exhibit = &exhibit;
        self.state
            .get_rw_lock(exhibit_id, RUNTIME_INFO_LOCK)
            .with_lock(ctx, move || self.stop_locked(ctx, exhibit))
            .await
    }

    async fn cleanup_application(&self, ctx: &Context, exhibit_id: &str) -> Result<()> {
        let exhibit = self.state.get_exhibit_by_id(ctx, exhibit_id).await?;
        let exhibit = &exhibit;
        self.state
            .get_rw_lock(exhibit_id, RUNTIME_INFO_LOCK)
            .with_lock(ctx, move || self.cleanup_locked(ctx, exhibit))
            .await
    }
}
