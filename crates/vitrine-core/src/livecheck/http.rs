//! HTTP livecheck
//!
//! Config keys: `method` (GET, POST, PUT, DELETE; default GET), `path`
//! (default `/`), `status` (default `200`). The target port is the object's port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use vitrine_common::model::{Exhibit, Object};
use vitrine_common::{Context, Result, VitrineError};

use super::{CheckOutcome, Livecheck};
use crate::resolver::ApplicationResolver;

pub const ALLOWED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Probe parameters parsed from the object's livecheck config
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpProbe {
    pub method: Method,
    pub path: String,
    pub status: u16,
    pub port: u16,
}

impl HttpProbe {
    pub fn from_object(object: &Object) -> Result<Self> {
        let config = |key: &str| {
            object
                .livecheck
                .as_ref()
                .and_then(|l| l.config_value(key))
        };

        let method_name = config("method").unwrap_or("GET").to_uppercase();
        if !ALLOWED_METHODS.contains(&method_name.as_str()) {
            return Err(VitrineError::Fatal(format!(
                "livecheck method '{}' of object '{}' is not supported",
                method_name, object.name
            )));
        }
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|e| VitrineError::Fatal(format!("livecheck method: {}", e)))?;

        let path = match config("path") {
            Some(path) if path.starts_with('/') => path.to_string(),
            Some(path) => format!("/{}", path),
            None => "/".to_string(),
        };

        let raw_status = config("status").unwrap_or("200");
        let status = raw_status.parse::<u16>().map_err(|_| {
            VitrineError::Fatal(format!(
                "livecheck status '{}' of object '{}' is not a status code",
                raw_status, object.name
            ))
        })?;

        let raw_port = object.port_or_default();
        let port = raw_port.parse::<u16>().map_err(|_| {
            VitrineError::Fatal(format!(
                "port '{}' of object '{}' is not a number",
                raw_port, object.name
            ))
        })?;

        Ok(Self {
            method,
            path,
            status,
            port,
        })
    }
}

pub struct HttpLivecheck {
    resolver: Arc<dyn ApplicationResolver>,
    client: reqwest::Client,
}

impl HttpLivecheck {
    pub fn new(resolver: Arc<dyn ApplicationResolver>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| VitrineError::Fatal(format!("failed to build livecheck client: {}", e)))?;

        Ok(Self { resolver, client })
    }
}

#[async_trait]
impl Livecheck for HttpLivecheck {
    async fn check(&self, ctx: &Context, exhibit: &Exhibit, object: &Object) -> Result<CheckOutcome> {
        let probe = HttpProbe::from_object(object)?;

        let host = match self.resolver.lookup_object(exhibit, object).await {
            Ok(host) => host,
            Err(e) if e.is_retryable() => {
                debug!(exhibit_id = %exhibit.id, object = %object.name, error = %e, "object not addressable yet");
                return Ok(CheckOutcome::Retry);
            }
            Err(e) => return Err(e),
        };

        let url = format!("http://{}:{}{}", host, probe.port, probe.path);
        let request = self.client.request(probe.method.clone(), &url).send();

        match ctx.run(async { Ok(request.await) }).await? {
            Ok(response) if response.status().as_u16() == probe.status => Ok(CheckOutcome::Ready),
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), expected = probe.status, "unexpected livecheck status");
                Ok(CheckOutcome::Retry)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "livecheck request failed");
                Ok(CheckOutcome::Retry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_common::model::{Livecheck as LivecheckConfig, LivecheckKind};

    fn object(config: &[(&str, &str)], port: Option<&str>) -> Object {
        Object {
            name: "web".to_string(),
            image: "nginx".to_string(),
            port: port.map(str::to_string),
            livecheck: Some(LivecheckConfig {
                kind: LivecheckKind::Http,
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_probe_defaults() {
        let probe = HttpProbe::from_object(&object(&[], None)).unwrap();
        assert_eq!(probe.method, Method::GET);
        assert_eq!(probe.path, "/");
        assert_eq!(probe.status, 200);
        assert_eq!(probe.port, 80);
    }

    #[test]
    fn test_probe_config() {
        let probe = HttpProbe::from_object(&object(
            &[("method", "post"), ("path", "health"), ("status", "204")],
            Some("8080"),
        ))
        .unwrap();
        assert_eq!(probe.method, Method::POST);
        assert_eq!(probe.path, "/health");
        assert_eq!(probe.status, 204);
        assert_eq!(probe.port, 8080);
    }

    #[test]
    fn test_probe_rejects_malformed_config() {
        assert!(HttpProbe::from_object(&object(&[("status", "ok")], None)).is_err());
        assert!(HttpProbe::from_object(&object(&[("method", "PATCH")], None)).is_err());
        assert!(HttpProbe::from_object(&object(&[], Some("http"))).is_err());
    }
}
