//! HTTP server setup

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use crate::api;
use crate::model::AppState;

/// Creates and binds the main HTTP server.
///
/// Serves the exhibit management API, the health probes, and every request
/// routed to an exhibit.
pub fn main_server(
    app_state: Arc<AppState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::from(app_state.clone()))
            .configure(api::configure)
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}
