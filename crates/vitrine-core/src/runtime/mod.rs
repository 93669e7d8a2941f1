//! Container runtime primitives
//!
//! The provisioner, resolver, and exec livecheck talk to containers only
//! through [`ContainerRuntime`]. Containers are addressed by their
//! deterministic `{exhibitName}_{objectName}` name.

pub mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use vitrine_common::Result;

pub use docker::DockerRuntime;

/// Label attached to every container created for an exhibit
pub const EXHIBIT_ID_LABEL: &str = "vitrine.exhibit.id";

/// Label naming the object a container was created for
pub const OBJECT_LABEL: &str = "vitrine.object";

/// Everything needed to create one container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub hostname: String,
    pub network: String,
    /// Extra DNS names on `network`
    pub aliases: Vec<String>,
    /// `host_path:container_path` bind mounts
    pub binds: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Inspection result for an existing container
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Address on the exhibit network, when attached
    pub address: Option<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `reference` unless it is already present locally
    async fn ensure_image(&self, reference: &str) -> Result<()>;

    /// Create the bridge network `name` unless it exists
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Remove network `name`; a missing network is not an error
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// `None` when no container with that name exists
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    /// Returns `false` when the container does not exist
    async fn stop_container(&self, name: &str) -> Result<bool>;

    /// Force-remove the container. Returns `false` when it does not exist
    async fn remove_container(&self, name: &str) -> Result<bool>;

    /// Run `cmd` inside the container and return its exit code
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<i64>;
}
