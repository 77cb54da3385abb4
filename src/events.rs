// src/events.rs - Notification records published by each device

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of notification raised by the orchestration core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Control state transition
    StateChanged,
    /// Derived control mode changed (Offline/Local/Remote)
    ControlModeChanged,
    ProcessStateChanged,
    EquipmentStateChanged,
    AlarmOccurred,
    AlarmCleared,
    InitializationProgress,
    InitializationComplete,
    /// Lifecycle of a device instance inside the coordinator
    DeviceInstance,
    /// Edge-sourced controller event mapped to a CEID
    CollectionEvent,
}

/// `(type, old, new, timestamp, reason?)` notification record
#[derive(Debug, Clone, Serialize)]
pub struct GemEvent {
    pub id: Uuid,
    pub device_id: String,
    pub kind: EventKind,
    pub old: Option<String>,
    pub new: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

impl GemEvent {
    pub fn new(device_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            kind,
            old: None,
            new: None,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    pub fn transition(
        device_id: impl Into<String>,
        kind: EventKind,
        old: impl ToString,
        new: impl ToString,
    ) -> Self {
        Self {
            old: Some(old.to_string()),
            new: Some(new.to_string()),
            ..Self::new(device_id, kind)
        }
    }

    pub fn with_new(mut self, new: impl ToString) -> Self {
        self.new = Some(new.to_string());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Per-device fan-out of [`GemEvent`]s.
///
/// Publishing never blocks and never fails; with no subscribers the event is
/// dropped. Slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: GemEvent) {
        trace!(
            kind = ?event.kind,
            device = %event.device_id,
            subscribers = self.subscriber_count(),
            "publishing event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(GemEvent::new("EQ1", EventKind::AlarmOccurred));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_transition() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(
            GemEvent::transition("EQ1", EventKind::StateChanged, "A", "B").with_reason("test"),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::StateChanged);
        assert_eq!(event.old.as_deref(), Some("A"));
        assert_eq!(event.new.as_deref(), Some("B"));
        assert_eq!(event.reason.as_deref(), Some("test"));
    }
}
