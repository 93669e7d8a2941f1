//! Vitrine Server - HTTP boundary of the exhibit control plane
//!
//! This crate provides:
//! - Exhibit management API and provisioning status stream
//! - Lifecycle dispatch of requests routed to exhibits
//! - Configuration, logging, metrics, and component wiring

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod route;
pub mod startup;
