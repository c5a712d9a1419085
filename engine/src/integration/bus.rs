//! Integration event bus
//!
//! Pub/sub over Tokio broadcast channels. Collaborators subscribe to learn
//! about crises and each other's failures; critical events also go out on a
//! separate channel so alerting never waits on the periodic log review.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{EventSeverity, IntegrationEvent};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to IntegrationBus
pub type SharedIntegrationBus = Arc<IntegrationBus>;

pub struct IntegrationBus {
    sender: broadcast::Sender<IntegrationEvent>,
    critical: broadcast::Sender<IntegrationEvent>,
}

impl IntegrationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (critical, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, critical }
    }

    pub fn shared(self) -> SharedIntegrationBus {
        Arc::new(self)
    }

    /// Publish to all subscribers; having none is fine.
    pub fn publish(&self, event: IntegrationEvent) {
        let event_type = event.event_type();
        if event.is_critical() {
            let _ = self.critical.send(event.clone());
        }
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Integration event published"),
            Err(_) => debug!(event_type, "Integration event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntegrationEvent> {
        self.sender.subscribe()
    }

    /// Critical events only
    pub fn subscribe_critical(&self) -> broadcast::Receiver<IntegrationEvent> {
        self.critical.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for IntegrationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub system: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub min_severity: Option<EventSeverity>,
}

impl EventFilter {
    /// Matches everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn matches(&self, event: &IntegrationEvent) -> bool {
        if let Some(ref system) = self.system {
            if event.kind.system() != system {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

/// Receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<IntegrationEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<IntegrationEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub async fn recv(&mut self) -> Result<IntegrationEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::types::{
        CrisisAccessImpact, FailureSeverity, IntegrationEventKind, SystemFailure,
    };

    fn sync_started() -> IntegrationEvent {
        IntegrationEvent::new(IntegrationEventKind::CalendarSyncStarted, EventSeverity::Info)
    }

    fn storage_down() -> IntegrationEvent {
        let failure = SystemFailure::new(
            "storage",
            "unreadable",
            FailureSeverity::Critical,
            CrisisAccessImpact::Unavailable,
        );
        IntegrationEvent::new(
            IntegrationEventKind::SystemFailure { failure },
            EventSeverity::Critical,
        )
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = IntegrationBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(sync_started());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "calendar_sync_started");
    }

    #[tokio::test]
    async fn test_critical_channel_only_gets_critical() {
        let bus = IntegrationBus::new().shared();
        let mut critical = bus.subscribe_critical();

        bus.publish(sync_started());
        bus.publish(storage_down());

        let received = critical.recv().await.unwrap();
        assert_eq!(received.event_type(), "system_failure");
        assert!(critical.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = IntegrationBus::new();
        assert!(!bus.has_subscribers());
        bus.publish(sync_started());
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .system("storage")
            .min_severity(EventSeverity::Warning);

        assert!(filter.matches(&storage_down()));
        assert!(!filter.matches(&sync_started()));

        let by_type = EventFilter::new().types(vec!["calendar_sync_started"]);
        assert!(by_type.matches(&sync_started()));
        assert!(!by_type.matches(&storage_down()));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = IntegrationBus::new();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().system("storage"));

        bus.publish(sync_started());
        bus.publish(storage_down());

        let received = filtered.recv().await.unwrap();
        assert_eq!(received.kind.system(), "storage");
    }
}
