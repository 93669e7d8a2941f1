//! Shared wiring for control-plane integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use vitrine_common::model::{Exhibit, ExhibitStatus, Object, RuntimeInfo};
use vitrine_common::{Context, Result};
use vitrine_consistency::{CoordinationStore, MemoryStore, Session};
use vitrine_core::testkit::{FakeRuntime, RecordingEmitter};
use vitrine_core::{
    ApplicationResolver, CleanupScheduler, ContainerProvisioner, ContainerResolver,
    ContainerRuntime, EnvironmentTemplate, Eventing, ExecLivecheck, ExhibitService,
    HttpLivecheck, LifecycleOrchestrator, Livechecks,
};
use vitrine_persistence::{CachedState, DistributedState, StateOptions};

pub struct Harness {
    pub state: Arc<CachedState>,
    pub runtime: Arc<FakeRuntime>,
    pub emitter: Arc<RecordingEmitter>,
    pub exhibits: Arc<ExhibitService>,
    pub provisioner: Arc<ContainerProvisioner>,
    pub orchestrator: LifecycleOrchestrator,
    pub cleanup: CleanupScheduler,
}

impl Harness {
    pub async fn new() -> Self {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let session = Arc::new(Session::new(store, Duration::from_secs(30)).await.unwrap());
        let state = CachedState::start(session, StateOptions::default())
            .await
            .unwrap();
        let state_dyn: Arc<dyn DistributedState> = state.clone();

        let runtime = Arc::new(FakeRuntime::new());
        let runtime_dyn: Arc<dyn ContainerRuntime> = runtime.clone();
        let emitter = Arc::new(RecordingEmitter::new());
        let eventing = Eventing::new(emitter.clone());

        let resolver: Arc<dyn ApplicationResolver> = Arc::new(ContainerResolver::new(
            state_dyn.clone(),
            runtime_dyn.clone(),
            16,
        ));
        let livechecks = Livechecks::new(
            Arc::new(HttpLivecheck::new(resolver.clone(), Duration::from_millis(200)).unwrap()),
            Arc::new(ExecLivecheck::new(runtime_dyn.clone())),
        );

        let exhibits = Arc::new(ExhibitService::new(
            state_dyn.clone(),
            runtime_dyn.clone(),
            eventing.clone(),
        ));
        let provisioner = Arc::new(ContainerProvisioner::new(
            state_dyn.clone(),
            runtime_dyn,
            resolver,
            livechecks,
            EnvironmentTemplate::new("localhost", 8080),
            eventing.clone(),
            Duration::from_secs(5),
        ));
        let orchestrator = LifecycleOrchestrator::new(exhibits.clone(), provisioner.clone());
        let cleanup = CleanupScheduler::new(exhibits.clone(), provisioner.clone(), eventing);

        Self {
            state,
            runtime,
            emitter,
            exhibits,
            provisioner,
            orchestrator,
            cleanup,
        }
    }

    pub async fn create(&self, exhibit: Exhibit) -> String {
        self.exhibits
            .create_exhibit(&Context::new(), exhibit)
            .await
            .unwrap()
    }

    pub async fn runtime_info(&self, id: &str) -> RuntimeInfo {
        self.state
            .refresh_runtime_info(&Context::new(), id)
            .await
            .unwrap()
    }

    pub async fn wait_for_status(&self, id: &str, status: ExhibitStatus) {
        for _ in 0..500 {
            if self.runtime_info(id).await.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("exhibit {} never reached {}", id, status);
    }
}

pub fn object(name: &str, image: &str) -> Object {
    Object {
        name: name.to_string(),
        image: image.to_string(),
        ..Default::default()
    }
}

/// Two-object exhibit exposing `web`, whose environment points at `db`
pub fn blog(name: &str) -> Exhibit {
    let mut web = object("web", "nginx");
    web.label = Some("alpine".to_string());
    web.environment = [
        ("DATABASE_HOST".to_string(), "{{ @db }}".to_string()),
        ("PUBLIC_URL".to_string(), "http://{{ host }}".to_string()),
    ]
    .into();

    Exhibit {
        name: name.to_string(),
        expose: "web".to_string(),
        objects: vec![object("db", "postgres"), web],
        lease: "10m".to_string(),
        ..Default::default()
    }
}

/// Resolver pointing every lookup at one fixed address
pub struct StubResolver {
    pub address: String,
}

impl StubResolver {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    fn host(&self) -> String {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| self.address.clone())
    }
}

#[async_trait]
impl ApplicationResolver for StubResolver {
    async fn resolve_application(&self, _ctx: &Context, _exhibit_id: &str) -> Result<String> {
        Ok(self.address.clone())
    }

    async fn resolve_exhibit_object(&self, _exhibit: &Exhibit, _object: &Object) -> Result<String> {
        Ok(self.host())
    }

    async fn lookup_object(&self, _exhibit: &Exhibit, _object: &Object) -> Result<String> {
        Ok(self.host())
    }

    fn invalidate(&self, _hostname: &str) {}
}

/// Minimal HTTP/1.1 server answering every connection with `response`.
///
/// The head of each received request is sent on the returned channel.
pub async fn serve(response: Vec<u8>) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let response = response.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Server that accepts connections and never answers
pub async fn serve_hanging() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n", status, body.len());
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    let mut bytes = response.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}
