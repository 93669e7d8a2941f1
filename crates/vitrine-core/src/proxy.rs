//! Request forwarding to running exhibits
//!
//! The HTTP boundary converts its request into a [`ProxyRequest`]; the
//! forwarded response is fully buffered and rewritten before it is returned,
//! so a failed or timed-out round trip never produces a partial response.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{debug, warn};
use vitrine_common::{Context, Result, VitrineError};

use crate::resolver::ApplicationResolver;
use crate::rewrite::Rewriter;

/// Headers scoped to a single connection, never forwarded
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_forwardable(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&name.as_str()) && name != "content-length"
}

#[derive(Clone, Debug, Default)]
pub struct ProxyRequest {
    pub method: String,
    /// Path below `/exhibit/{id}/`, without a leading slash
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

#[derive(Clone, Debug, Default)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

pub struct ExhibitProxy {
    resolver: Arc<dyn ApplicationResolver>,
    rewriter: Rewriter,
    client: reqwest::Client,
    timeout: Duration,
}

impl ExhibitProxy {
    pub fn new(
        resolver: Arc<dyn ApplicationResolver>,
        rewriter: Rewriter,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| VitrineError::Fatal(format!("failed to build proxy client: {}", e)))?;

        Ok(Self {
            resolver,
            rewriter,
            client,
            timeout,
        })
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    /// Forward `request` to the exhibit and return the rewritten response
    pub async fn forward(
        &self,
        ctx: &Context,
        exhibit_id: &str,
        request: ProxyRequest,
    ) -> Result<ProxyResponse> {
        let address = self.resolver.resolve_application(ctx, exhibit_id).await?;

        let result = ctx
            .run(async {
                tokio::time::timeout(self.timeout, self.round_trip(&address, request))
                    .await
                    .map_err(|_| {
                        VitrineError::Timeout(format!(
                            "proxy request to exhibit '{}' exceeded {:?}",
                            exhibit_id, self.timeout
                        ))
                    })?
            })
            .await;

        let upstream = match result {
            Ok(upstream) => upstream,
            Err(e) => {
                let outcome = if matches!(e, VitrineError::Timeout(_)) {
                    "timeout"
                } else {
                    "error"
                };
                counter!("vitrine_proxy_requests_total", "outcome" => outcome).increment(1);
                warn!(exhibit_id = %exhibit_id, address = %address, error = %e, "proxy request failed");
                return Err(e);
            }
        };

        let response = self.rewrite(exhibit_id, upstream)?;
        counter!("vitrine_proxy_requests_total", "outcome" => "success").increment(1);
        Ok(response)
    }

    async fn round_trip(&self, address: &str, request: ProxyRequest) -> Result<ProxyResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| VitrineError::Validation(format!("invalid method '{}'", request.method)))?;

        let mut url = format!("http://{}/{}", address, request.path);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        debug!(method = %method, url = %url, "forwarding request");

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if !is_forwardable(name) {
                continue;
            }
            // Only gzip bodies can be rewritten
            if name.eq_ignore_ascii_case("accept-encoding") {
                let accepts_gzip = String::from_utf8_lossy(value).contains("gzip");
                if accepts_gzip {
                    builder = builder.header("accept-encoding", "gzip");
                }
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                builder = builder.header(name, value);
            }
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| VitrineError::Transient(format!("upstream request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| VitrineError::Transient(format!("upstream body failed: {}", e)))?;

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }

    fn rewrite(&self, exhibit_id: &str, upstream: ProxyResponse) -> Result<ProxyResponse> {
        let encoding = upstream
            .header("content-encoding")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::to_string);
        let body = self
            .rewriter
            .rewrite_body(exhibit_id, &upstream.body, encoding.as_deref())?;

        let mut headers = Vec::with_capacity(upstream.headers.len());
        for (name, value) in upstream.headers {
            if !is_forwardable(&name) {
                continue;
            }
            if name.eq_ignore_ascii_case("location")
                && let Ok(location) = std::str::from_utf8(&value)
            {
                let location = self.rewriter.rewrite_location(exhibit_id, location)?;
                headers.push((name, location.into_bytes()));
                continue;
            }
            headers.push((name, value));
        }

        Ok(ProxyResponse {
            status: upstream.status,
            headers,
            body: Bytes::from(body),
        })
    }
}
