//! Catch-all handler for requests addressed to an exhibit
//!
//! Every request under `/exhibit/{id}/` is answered from the exhibit's
//! lifecycle status: forwarded when running, a loading page while it starts,
//! and 503 while it stops.

use actix_web::http::StatusCode;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder, web};
use tracing::debug;
use vitrine_common::model::Exhibit;
use vitrine_common::{Context, VitrineError};
use vitrine_core::{Dispatch, ProxyRequest, ProxyResponse};

use crate::error::AppError;
use crate::metrics::record_dispatch;
use crate::model::AppState;
use crate::model::response::Result;

const LOADING_PAGE: &str = include_str!("loading.html");

/// Render the waiting view for `exhibit`.
///
/// The name is page text; id and host are attribute values read by the script.
pub fn loading_page(exhibit: &Exhibit, authority: &str) -> String {
    LOADING_PAGE
        .replace("{{name}}", &htmlescape::encode_minimal(&exhibit.name))
        .replace("{{host}}", &htmlescape::encode_attribute(authority))
        .replace("{{id}}", &htmlescape::encode_attribute(&exhibit.id))
}

fn proxy_request(req: &HttpRequest, path: &str, body: web::Bytes) -> ProxyRequest {
    let query = req.query_string();
    ProxyRequest {
        method: req.method().as_str().to_string(),
        path: path.to_string(),
        query: (!query.is_empty()).then(|| query.to_string()),
        headers: req
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect(),
        body,
    }
}

fn into_http_response(response: ProxyResponse) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponseBuilder::new(status);
    for (name, value) in response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(&value),
        ) {
            (Ok(name), Ok(value)) => {
                builder.append_header((name, value));
            }
            _ => debug!(header = %name, "dropping invalid upstream header"),
        }
    }
    builder.body(response.body)
}

pub async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let route = data.exhibit_route.matches(req.path());
    let Some((id, rest)) = route
        .as_ref()
        .and_then(|m| Some((m.param("id")?, m.rest().unwrap_or_default())))
    else {
        return Err(AppError::from(VitrineError::NotFound(format!("route '{}'", req.path()))).into());
    };

    let ctx = Context::new();
    let outcome = match data.orchestrator.dispatch(&ctx, id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            record_dispatch("error");
            return Err(AppError::from(e).into());
        }
    };

    match outcome {
        Dispatch::Proxy(_) => {
            record_dispatch("proxy");
            let request = proxy_request(&req, rest, body);
            let response = data
                .proxy
                .forward(&ctx, id, request)
                .await
                .map_err(AppError::from)?;
            data.orchestrator.touch(id);
            Ok(into_http_response(response))
        }
        Dispatch::Waiting(exhibit) => {
            record_dispatch("waiting");
            Ok(HttpResponse::Ok()
                .content_type("text/html; charset=utf-8")
                .body(loading_page(&exhibit, &data.authority)))
        }
        Dispatch::Unavailable(exhibit) => {
            record_dispatch("unavailable");
            let error = VitrineError::NotRunning(format!("exhibit '{}' is stopping", exhibit.id));
            Ok(Result::<String>::http_response(
                StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                error.error_code().code,
                error.to_string(),
                String::new(),
            ))
        }
    }
}
