//! Vitrine Core - Exhibit control plane
//!
//! This crate provides:
//! - Container runtime contract and the Docker Engine driver
//! - Address resolution with a bounded cache
//! - HTTP and exec livechecks with the polling policy
//! - Container provisioning (start, stop, cleanup)
//! - Exhibit definition management and lifecycle dispatch
//! - Lease-expiry sweeps
//! - Request forwarding with response rewriting
//! - Lifecycle event fan-out

pub mod cleanup;
pub mod eventing;
pub mod exhibit_service;
pub mod livecheck;
pub mod orchestrator;
pub mod provisioner;
pub mod proxy;
pub mod resolver;
pub mod rewrite;
pub mod runtime;
pub mod template;
pub mod volume;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use cleanup::{CleanupScheduler, SweepReport};
pub use eventing::{BroadcastBus, Consumer, Emitter, EventStream, Eventing, NoopEmitter};
pub use exhibit_service::ExhibitService;
pub use livecheck::{CheckOutcome, ExecLivecheck, HttpLivecheck, Livecheck, Livechecks};
pub use orchestrator::{Dispatch, LifecycleOrchestrator};
pub use provisioner::{ApplicationProvisioner, ContainerProvisioner};
pub use proxy::{ExhibitProxy, ProxyRequest, ProxyResponse};
pub use resolver::{ApplicationResolver, ContainerResolver};
pub use rewrite::Rewriter;
pub use runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, DockerRuntime};
pub use template::EnvironmentTemplate;
