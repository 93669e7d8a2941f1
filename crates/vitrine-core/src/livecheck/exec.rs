//! Exec livecheck: runs `sh -c <command>` in the object's container

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vitrine_common::model::{Exhibit, Object};
use vitrine_common::{Context, Result, container_name};

use super::{CheckOutcome, Livecheck};
use crate::runtime::ContainerRuntime;

pub const DEFAULT_COMMAND: &str = "true";

pub struct ExecLivecheck {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ExecLivecheck {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Livecheck for ExecLivecheck {
    async fn check(&self, ctx: &Context, exhibit: &Exhibit, object: &Object) -> Result<CheckOutcome> {
        let command = object
            .livecheck
            .as_ref()
            .and_then(|l| l.config_value("command"))
            .unwrap_or(DEFAULT_COMMAND);
        let cmd = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        let name = container_name(&exhibit.name, &object.name);

        let exit_code = ctx.run(self.runtime.exec(&name, &cmd)).await?;
        if exit_code == 0 {
            Ok(CheckOutcome::Ready)
        } else {
            debug!(container = %name, exit_code, "exec livecheck not ready");
            Ok(CheckOutcome::Retry)
        }
    }
}
