//! In-memory doubles for the container runtime and the event bus

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vitrine_common::model::{EventType, LifecycleEvent};
use vitrine_common::{Result, VitrineError};

use crate::eventing::Emitter;
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};

#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub id: String,
    pub running: bool,
    pub address: String,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    networks: HashSet<String>,
    images: HashSet<String>,
    calls: HashMap<String, usize>,
    failures: HashMap<String, usize>,
    delays: HashMap<String, Duration>,
    exec_exit_codes: VecDeque<i64>,
    next_address: u32,
    pinned_address: Option<String>,
}

/// Scriptable [`ContainerRuntime`] that records every call
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with a fatal error
    pub fn fail_next(&self, op: &str, times: usize) {
        self.state.lock().failures.insert(op.to_string(), times);
    }

    /// Delay every call of `op`
    pub fn delay(&self, op: &str, delay: Duration) {
        self.state.lock().delays.insert(op.to_string(), delay);
    }

    /// Exit codes returned by upcoming `exec` calls; `0` once exhausted
    pub fn push_exec_exit_codes(&self, codes: impl IntoIterator<Item = i64>) {
        self.state.lock().exec_exit_codes.extend(codes);
    }

    /// Give every container placed from now on `address`
    pub fn pin_address(&self, address: &str) {
        self.state.lock().pinned_address = Some(address.to_string());
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().networks.contains(name)
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().images.contains(reference)
    }

    /// Place a container as if left behind by an earlier run
    pub fn insert_container(&self, spec: ContainerSpec, running: bool) {
        let mut state = self.state.lock();
        state.next_address += 1;
        let address = match &state.pinned_address {
            Some(address) => address.clone(),
            None => format!("10.0.0.{}", state.next_address),
        };
        let name = spec.name.clone();
        state.containers.insert(
            name.clone(),
            FakeContainer {
                spec,
                id: format!("id-{}", name),
                running,
                address,
            },
        );
    }

    async fn enter(&self, op: &str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            *state.calls.entry(op.to_string()).or_default() += 1;
            if let Some(remaining) = state.failures.get_mut(op)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(VitrineError::Fatal(format!("injected {} failure", op)));
            }
            state.delays.get(op).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, reference: &str) -> Result<()> {
        self.enter("ensure_image").await?;
        self.state.lock().images.insert(reference.to_string());
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        self.enter("ensure_network").await?;
        self.state.lock().networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.enter("remove_network").await?;
        self.state.lock().networks.remove(name);
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.enter("inspect_container").await?;
        Ok(self.state.lock().containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: name.to_string(),
            running: c.running,
            address: c.running.then(|| c.address.clone()),
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.enter("create_container").await?;
        if self.state.lock().containers.contains_key(&spec.name) {
            return Err(VitrineError::Fatal(format!(
                "container name '{}' already in use",
                spec.name
            )));
        }
        self.insert_container(spec.clone(), false);
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.enter("start_container").await?;
        match self.state.lock().containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(VitrineError::NotFound(format!("container '{}'", name))),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<bool> {
        self.enter("stop_container").await?;
        match self.state.lock().containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<bool> {
        self.enter("remove_container").await?;
        Ok(self.state.lock().containers.remove(name).is_some())
    }

    async fn exec(&self, name: &str, _cmd: &[String]) -> Result<i64> {
        self.enter("exec").await?;
        let mut state = self.state.lock();
        if !state.containers.get(name).is_some_and(|c| c.running) {
            return Err(VitrineError::Fatal(format!("container '{}' is not running", name)));
        }
        Ok(state.exec_exit_codes.pop_front().unwrap_or(0))
    }
}

/// Emitter that keeps every event in memory
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, event_type: EventType) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Emitter for RecordingEmitter {
    async fn emit_event(&self, event: LifecycleEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
