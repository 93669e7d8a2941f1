//! Docker Engine API driver
//!
//! Talks to the engine's HTTP API over TCP (`tcp://host:port` or
//! `http(s)://host:port`). Unix sockets must be exposed over TCP first.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use vitrine_common::{Result, VitrineError};

use super::{ContainerInfo, ContainerRuntime, ContainerSpec};

#[derive(Deserialize)]
struct EngineError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct EndpointSettings {
    #[serde(default, rename = "IPAddress")]
    ip_address: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecInspect {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody<'a> {
    image: &'a str,
    hostname: &'a str,
    env: &'a [String],
    labels: &'a BTreeMap<String, String>,
    host_config: serde_json::Value,
    networking_config: serde_json::Value,
}

/// Split `nginx:1.27` into `("nginx", Some("1.27"))`, leaving registry ports alone
fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => {
            (&reference[..idx], Some(&reference[idx + 1..]))
        }
        _ => (reference, None),
    }
}

pub struct DockerRuntime {
    client: reqwest::Client,
    base: Url,
}

impl DockerRuntime {
    pub fn new(docker_host: &str) -> Result<Self> {
        let base = Self::engine_url(docker_host)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VitrineError::Fatal(format!("failed to build docker client: {}", e)))?;

        info!(endpoint = %base, "docker runtime configured");
        Ok(Self { client, base })
    }

    fn engine_url(docker_host: &str) -> Result<Url> {
        let normalized = if let Some(rest) = docker_host.strip_prefix("tcp://") {
            format!("http://{}", rest)
        } else if docker_host.starts_with("http://") || docker_host.starts_with("https://") {
            docker_host.to_string()
        } else {
            return Err(VitrineError::Fatal(format!(
                "unsupported docker host '{}', expected tcp:// or http(s)://",
                docker_host
            )));
        };

        Url::parse(&normalized)
            .map_err(|e| VitrineError::Fatal(format!("invalid docker host '{}': {}", docker_host, e)))
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| VitrineError::Fatal(format!("invalid engine path '{}': {}", path, e)))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method, self.url(path)?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        request
            .send()
            .await
            .map_err(|e| VitrineError::Transient(format!("docker engine unreachable: {}", e)))
    }

    /// Turn a non-success response into an error carrying the engine's message
    async fn engine_error(context: &str, response: reqwest::Response) -> VitrineError {
        let status = response.status();
        let message = match response.json::<EngineError>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };

        if status.is_server_error() {
            VitrineError::Transient(format!("{}: {}", context, message))
        } else {
            VitrineError::Fatal(format!("{}: {}", context, message))
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| VitrineError::Fatal(format!("unexpected engine response: {}", e)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, reference: &str) -> Result<()> {
        let response = self
            .send(Method::GET, &format!("/images/{}/json", reference), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => {
                debug!(image = %reference, "image already present");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(Self::engine_error("inspect image", response).await),
        }

        info!(image = %reference, "pulling image");
        let (image, tag) = split_reference(reference);
        let mut query = vec![("fromImage", image)];
        if let Some(tag) = tag {
            query.push(("tag", tag));
        }

        let response = self
            .send(Method::POST, "/images/create", &query, None)
            .await?;
        if !response.status().is_success() {
            return Err(Self::engine_error("pull image", response).await);
        }

        // Progress is streamed as JSON lines; failures arrive in-band.
        let body = response
            .text()
            .await
            .map_err(|e| VitrineError::Transient(format!("pull image: {}", e)))?;
        for line in body.lines() {
            if let Ok(progress) = serde_json::from_str::<serde_json::Value>(line)
                && let Some(error) = progress.get("error").and_then(|e| e.as_str())
            {
                return Err(VitrineError::Fatal(format!("pull image '{}': {}", reference, error)));
            }
        }

        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        let response = self
            .send(Method::GET, &format!("/networks/{}", name), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            _ => return Err(Self::engine_error("inspect network", response).await),
        }

        warn!(network = %name, "network not found, creating");
        let body = json!({ "Name": name, "Driver": "bridge", "CheckDuplicate": true });
        let response = self
            .send(Method::POST, "/networks/create", &[], Some(body))
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            // Created concurrently by another replica
            StatusCode::CONFLICT => Ok(()),
            _ => Err(Self::engine_error("create network", response).await),
        }
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let response = self
            .send(Method::DELETE, &format!("/networks/{}", name), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::engine_error("remove network", response).await),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let response = self
            .send(Method::GET, &format!("/containers/{}/json", name), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Ok(None),
            _ => return Err(Self::engine_error("inspect container", response).await),
        }

        let inspect: ContainerInspect = Self::decode(response).await?;
        let address = inspect
            .network_settings
            .networks
            .values()
            .map(|n| n.ip_address.clone())
            .find(|ip| !ip.is_empty());

        Ok(Some(ContainerInfo {
            id: inspect.id,
            name: inspect.name.trim_start_matches('/').to_string(),
            running: inspect.state.running,
            address,
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut endpoints = serde_json::Map::new();
        endpoints.insert(spec.network.clone(), json!({ "Aliases": spec.aliases }));

        let body = CreateContainerBody {
            image: &spec.image,
            hostname: &spec.hostname,
            env: &spec.env,
            labels: &spec.labels,
            host_config: json!({ "Binds": spec.binds, "NetworkMode": spec.network }),
            networking_config: json!({ "EndpointsConfig": endpoints }),
        };
        let body = serde_json::to_value(&body)?;

        let response = self
            .send(
                Method::POST,
                "/containers/create",
                &[("name", spec.name.as_str())],
                Some(body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::engine_error("create container", response).await);
        }

        let created: IdResponse = Self::decode(response).await?;
        debug!(container = %spec.name, id = %created.id, "container created");
        Ok(created.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let response = self
            .send(Method::POST, &format!("/containers/{}/start", name), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_MODIFIED => Ok(()),
            _ => Err(Self::engine_error("start container", response).await),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<bool> {
        let response = self
            .send(Method::POST, &format!("/containers/{}/stop", name), &[], None)
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_MODIFIED => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::engine_error("stop container", response).await),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<bool> {
        let response = self
            .send(
                Method::DELETE,
                &format!("/containers/{}", name),
                &[("force", "true")],
                None,
            )
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::engine_error("remove container", response).await),
        }
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<i64> {
        let body = json!({ "Cmd": cmd, "AttachStdout": true, "AttachStderr": true });
        let response = self
            .send(Method::POST, &format!("/containers/{}/exec", name), &[], Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(Self::engine_error("create exec", response).await);
        }
        let exec: IdResponse = Self::decode(response).await?;

        // Attached start returns once the command exits.
        let response = self
            .send(
                Method::POST,
                &format!("/exec/{}/start", exec.id),
                &[],
                Some(json!({ "Detach": false, "Tty": false })),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::engine_error("start exec", response).await);
        }
        response
            .bytes()
            .await
            .map_err(|e| VitrineError::Transient(format!("exec output: {}", e)))?;

        let response = self
            .send(Method::GET, &format!("/exec/{}/json", exec.id), &[], None)
            .await?;
        if !response.status().is_success() {
            return Err(Self::engine_error("inspect exec", response).await);
        }
        let inspect: ExecInspect = Self::decode(response).await?;
        match (inspect.running, inspect.exit_code) {
            (false, Some(code)) => Ok(code),
            _ => Err(VitrineError::Fatal(format!(
                "exec in '{}' did not report an exit code",
                name
            ))),
        }
    }
}
