//! Lifecycle events fanned out through the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EVENT_SOURCE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "vitrine.exhibit.create")]
    Create,
    #[serde(rename = "vitrine.exhibit.delete")]
    Delete,
    #[serde(rename = "vitrine.exhibit.lease.renewed")]
    LeaseRenewed,
    #[serde(rename = "vitrine.exhibit.lease.expired")]
    LeaseExpired,
    #[serde(rename = "vitrine.exhibit.start")]
    Start,
    #[serde(rename = "vitrine.exhibit.stop")]
    Stop,
    #[serde(rename = "vitrine.exhibit.starting")]
    Starting,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Create => "vitrine.exhibit.create",
            EventType::Delete => "vitrine.exhibit.delete",
            EventType::LeaseRenewed => "vitrine.exhibit.lease.renewed",
            EventType::LeaseExpired => "vitrine.exhibit.lease.expired",
            EventType::Start => "vitrine.exhibit.start",
            EventType::Stop => "vitrine.exhibit.stop",
            EventType::Starting => "vitrine.exhibit.starting",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provisioning step reported while an exhibit starts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartingStep {
    Clean,
    Create,
    Start,
    Livecheck,
    Ready,
}

impl StartingStep {
    pub const ALL: [StartingStep; 5] = [
        StartingStep::Clean,
        StartingStep::Create,
        StartingStep::Start,
        StartingStep::Livecheck,
        StartingStep::Ready,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartingStepEvent {
    pub exhibit_id: String,
    pub object: String,
    pub step: StartingStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub current_step_count: usize,
    pub total_step_count: usize,
}

/// Envelope for everything published on the bus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub time: DateTime<Utc>,
    pub exhibit_id: String,
    pub data: serde_json::Value,
}

impl LifecycleEvent {
    pub fn new(event_type: EventType, exhibit_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            source: EVENT_SOURCE.to_string(),
            time: Utc::now(),
            exhibit_id: exhibit_id.into(),
            data,
        }
    }

    /// Decode the payload of a `Starting` event
    pub fn starting_step(&self) -> Option<StartingStepEvent> {
        if self.event_type != EventType::Starting {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}
