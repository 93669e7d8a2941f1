//! Shared state handed to every HTTP handler

use std::sync::Arc;

use vitrine_consistency::Session;
use vitrine_core::{Consumer, ExhibitProxy, ExhibitService, LifecycleOrchestrator};

use crate::route::PathPattern;

/// Pattern of every request routed to an exhibit
pub const EXHIBIT_ROUTE: &str = "/exhibit/{id}/>>";

pub struct AppState {
    pub exhibits: Arc<ExhibitService>,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub proxy: Arc<ExhibitProxy>,
    pub events: Arc<dyn Consumer>,
    pub session: Arc<Session>,
    pub exhibit_route: PathPattern,
    /// Externally visible `host:port`
    pub authority: String,
}
