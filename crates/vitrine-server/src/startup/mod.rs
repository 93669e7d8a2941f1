//! Application startup utilities module.
//!
//! Logging, signal handling, component wiring, and the HTTP server.

mod http;
mod logging;
mod shutdown;
pub mod wiring;

pub use http::main_server;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::spawn_signal_listener;
pub use wiring::{Components, build};
