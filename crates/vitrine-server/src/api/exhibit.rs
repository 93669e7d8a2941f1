//! Exhibit management endpoints
//!
//! CRUD over exhibit definitions, explicit stop, and a short-lived
//! server-sent event stream of provisioning progress.

use std::convert::Infallible;
use std::time::Duration;

use actix_web::http::header::CACHE_CONTROL;
use actix_web::{HttpResponse, Scope, delete, get, post, web};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::info;
use vitrine_common::Context;
use vitrine_common::model::{EventType, Exhibit, ExhibitView};

use crate::error::AppError;
use crate::model::AppState;
use crate::model::response::Result;

/// How long a status subscription stays open
pub const STATUS_STREAM_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct CreatedResponse {
    status: &'static str,
    id: String,
}

/// Encode one server-sent event frame
pub fn sse_frame(event: &str, data: &serde_json::Value) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

/// GET /api/exhibits
#[get("")]
async fn list(data: web::Data<AppState>) -> actix_web::Result<HttpResponse> {
    let exhibits = data
        .exhibits
        .get_all_exhibits(&Context::new())
        .await
        .map_err(AppError::from)?;
    let views: Vec<ExhibitView> = exhibits.iter().map(ExhibitView::from).collect();

    Ok(Result::<Vec<ExhibitView>>::http_success(views))
}

/// GET /api/exhibits/{id}
#[get("/{id}")]
async fn find(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    let exhibit = data
        .exhibits
        .get_exhibit_by_id(&Context::new(), &path)
        .await
        .map_err(AppError::from)?;

    Ok(Result::<ExhibitView>::http_success(ExhibitView::from(
        &exhibit,
    )))
}

/// POST /api/exhibits
#[post("")]
async fn create(
    data: web::Data<AppState>,
    body: web::Json<Exhibit>,
) -> actix_web::Result<HttpResponse> {
    let id = data
        .exhibits
        .create_exhibit(&Context::new(), body.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Created().json(CreatedResponse {
        status: "Created",
        id,
    }))
}

/// DELETE /api/exhibits/{id}
#[delete("/{id}")]
async fn remove(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    data.exhibits
        .delete_exhibit(&Context::new(), &path)
        .await
        .map_err(AppError::from)?;

    Ok(Result::<bool>::http_success(true))
}

/// POST /api/exhibits/{id}/stop
#[post("/{id}/stop")]
async fn stop(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    let id = path.into_inner();
    data.orchestrator
        .stop(&Context::new(), &id)
        .await
        .map_err(AppError::from)?;
    info!(exhibit_id = %id, "exhibit stopped via api");

    Ok(Result::<bool>::http_success(true))
}

/// GET /api/exhibits/{id}/status
#[get("/{id}/status")]
async fn status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> actix_web::Result<HttpResponse> {
    let id = path.into_inner();
    data.exhibits
        .get_exhibit_by_id(&Context::new(), &id)
        .await
        .map_err(AppError::from)?;
    let events = data.events.get_events().await.map_err(AppError::from)?;

    let deadline = tokio::time::Instant::now() + STATUS_STREAM_DURATION;
    let subscribed = sse_frame("status.subscribed", &serde_json::json!({ "exhibitId": id }));
    let updates = stream::unfold((events, id), move |(mut events, id)| async move {
        loop {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(event))
                    if event.event_type == EventType::Starting && event.exhibit_id == id =>
                {
                    let frame = sse_frame("status.update", &event.data);
                    return Some((frame, (events, id)));
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    });
    let close = sse_frame("close", &serde_json::json!({}));

    let body = stream::once(async move { subscribed })
        .chain(updates)
        .chain(stream::once(async move { close }))
        .map(Ok::<_, Infallible>);

    Ok(HttpResponse::Ok()
        .insert_header((CACHE_CONTROL, "no-cache"))
        .content_type("text/event-stream")
        .streaming(body))
}

pub fn routes() -> Scope {
    web::scope("/api/exhibits")
        .service(list)
        .service(create)
        .service(status)
        .service(stop)
        .service(find)
        .service(remove)
}
