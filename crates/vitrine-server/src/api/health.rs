//! Liveness and readiness probes

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::model::AppState;
use crate::model::response::Result;

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

#[get("/liveness")]
pub async fn liveness() -> impl Responder {
    Result::<Status>::http_success(Status { status: "UP" })
}

/// Ready while the coordination session is open
#[get("/readiness")]
pub async fn readiness(data: web::Data<AppState>) -> impl Responder {
    if data.session.is_closed() {
        return Result::<Status>::http_response(
            503,
            503,
            "coordination session closed".to_string(),
            Status { status: "DOWN" },
        );
    }
    HttpResponse::Ok().json(Result::success(Status { status: "UP" }))
}

pub fn routes() -> actix_web::Scope {
    web::scope("/health").service(liveness).service(readiness)
}
