//! Lifecycle event fan-out
//!
//! `Emitter` and `Consumer` are the message bus seam. `BroadcastBus` is the
//! in-process bus; `Eventing` wraps an emitter with typed helpers and never
//! lets an emit failure interrupt the caller.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use vitrine_common::model::{
    EventType, Exhibit, ExhibitView, LifecycleEvent, StartingStep, StartingStepEvent,
};
use vitrine_common::{Result, VitrineError};

pub type EventStream = Pin<Box<dyn Stream<Item = LifecycleEvent> + Send>>;

#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit_event(&self, event: LifecycleEvent) -> Result<()>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Stream of every event published from now on
    async fn get_events(&self) -> Result<EventStream>;
}

/// In-process bus backed by a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Emitter for BroadcastBus {
    async fn emit_event(&self, event: LifecycleEvent) -> Result<()> {
        // No subscribers is not an error for a fire-and-forget bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl Consumer for BroadcastBus {
    async fn get_events(&self) -> Result<EventStream> {
        let receiver = self.sender.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event consumer lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Emitter that discards every event
pub struct NoopEmitter;

#[async_trait]
impl Emitter for NoopEmitter {
    async fn emit_event(&self, _event: LifecycleEvent) -> Result<()> {
        Ok(())
    }
}

/// Typed publishing helpers over an `Emitter`
#[derive(Clone)]
pub struct Eventing {
    emitter: Arc<dyn Emitter>,
}

impl Eventing {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self { emitter }
    }

    async fn publish(&self, event: LifecycleEvent) {
        let event_type = event.event_type;
        let exhibit_id = event.exhibit_id.clone();
        if let Err(e) = self.emitter.emit_event(event).await {
            warn!(%event_type, exhibit_id = %exhibit_id, error = %e, "failed to emit event");
        } else {
            debug!(%event_type, exhibit_id = %exhibit_id, "event emitted");
        }
    }

    async fn publish_exhibit(&self, event_type: EventType, exhibit: &Exhibit) {
        match serde_json::to_value(ExhibitView::from(exhibit)) {
            Ok(data) => {
                self.publish(LifecycleEvent::new(event_type, &exhibit.id, data))
                    .await
            }
            Err(e) => warn!(%event_type, error = %e, "failed to encode event payload"),
        }
    }

    pub async fn dispatch_created(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::Create, exhibit).await
    }

    pub async fn dispatch_deleted(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::Delete, exhibit).await
    }

    pub async fn dispatch_started(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::Start, exhibit).await
    }

    pub async fn dispatch_stopping(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::Stop, exhibit).await
    }

    pub async fn dispatch_lease_renewed(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::LeaseRenewed, exhibit).await
    }

    pub async fn dispatch_lease_expired(&self, exhibit: &Exhibit) {
        self.publish_exhibit(EventType::LeaseExpired, exhibit).await
    }

    pub async fn dispatch_starting_step(
        &self,
        exhibit_id: &str,
        object: &str,
        step: StartingStep,
        error: Option<&VitrineError>,
        current_step_count: usize,
        total_step_count: usize,
    ) {
        let payload = StartingStepEvent {
            exhibit_id: exhibit_id.to_string(),
            object: object.to_string(),
            step,
            error: error.map(|e| e.to_string()),
            current_step_count,
            total_step_count,
        };
        match serde_json::to_value(&payload) {
            Ok(data) => {
                self.publish(LifecycleEvent::new(EventType::Starting, exhibit_id, data))
                    .await
            }
            Err(e) => warn!(error = %e, "failed to encode starting step"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use vitrine_common::model::Object;

    fn exhibit() -> Exhibit {
        Exhibit {
            id: "e1".to_string(),
            name: "blog".to_string(),
            expose: "web".to_string(),
            objects: vec![Object {
                name: "web".to_string(),
                image: "nginx".to_string(),
                ..Default::default()
            }],
            lease: "5m".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_published_events() {
        let bus = Arc::new(BroadcastBus::default());
        let mut events = bus.get_events().await.unwrap();
        let eventing = Eventing::new(bus.clone());

        eventing.dispatch_created(&exhibit()).await;
        eventing
            .dispatch_starting_step("e1", "web", StartingStep::Clean, None, 1, 5)
            .await;

        let created = events.next().await.unwrap();
        assert_eq!(created.event_type, EventType::Create);
        assert_eq!(created.data["name"], "blog");

        let step = events.next().await.unwrap().starting_step().unwrap();
        assert_eq!(step.step, StartingStep::Clean);
        assert_eq!(step.total_step_count, 5);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let bus = BroadcastBus::new(4);
        let event = LifecycleEvent::new(EventType::Stop, "e1", serde_json::Value::Null);
        assert!(bus.emit_event(event).await.is_ok());
    }

    #[tokio::test]
    async fn test_starting_step_carries_error() {
        let bus = Arc::new(BroadcastBus::default());
        let mut events = bus.get_events().await.unwrap();
        let eventing = Eventing::new(bus.clone());

        let error = VitrineError::Timeout("livecheck".into());
        eventing
            .dispatch_starting_step("e1", "web", StartingStep::Livecheck, Some(&error), 4, 5)
            .await;

        let step = events.next().await.unwrap().starting_step().unwrap();
        assert_eq!(step.error.as_deref(), Some("timed out: livecheck"));
    }
}
