pub mod exhibit;
pub mod exhibit_proxy;
pub mod health;

use actix_web::web;

/// Register every route on `cfg`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(exhibit::routes())
        .service(health::routes())
        .default_service(web::to(exhibit_proxy::dispatch));
}
