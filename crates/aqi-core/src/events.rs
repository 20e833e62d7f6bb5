//! Acquisition event system.
//!
//! The state channel in [`crate::state`] only ever holds the latest
//! snapshot. Consumers that need every transition (a reading log, a
//! notification on reconnect) subscribe here instead.

use serde::Serialize;
use tokio::sync::broadcast;

use aqi_types::Reading;

/// Which connection strategy produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// MQTT subscription.
    Subscription,
    /// HTTP polling.
    Polling,
}

/// Events emitted by a data source.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AcquisitionEvent {
    /// A connection attempt started.
    Connecting { source: SourceKind, target: String },
    /// The transport reported a live connection.
    Connected { source: SourceKind },
    /// The transport is retrying.
    Reconnecting { source: SourceKind },
    /// The transport dropped.
    Disconnected {
        source: SourceKind,
        reason: DisconnectReason,
    },
    /// A new reading was accepted.
    Reading { source: SourceKind, reading: Reading },
    /// An error was surfaced to the state.
    Error { source: SourceKind, error: String },
    /// The source was stopped.
    Stopped { source: SourceKind },
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The broker went away.
    Offline,
    /// Transport error.
    Error(String),
    /// Connect deadline passed.
    Timeout,
    /// Session closed.
    Closed,
}

/// Receiver for acquisition events.
pub type EventReceiver = broadcast::Receiver<AcquisitionEvent>;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<AcquisitionEvent>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event. Having no receivers is not an error.
    pub fn send(&self, event: AcquisitionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn test_dispatcher_fanout() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(AcquisitionEvent::Connected {
            source: SourceKind::Subscription,
        });

        assert!(matches!(rx1.recv().await.unwrap(), AcquisitionEvent::Connected { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), AcquisitionEvent::Connected { .. }));
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(AcquisitionEvent::Stopped {
            source: SourceKind::Polling,
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let reading = Reading::builder("node").aqi(42.0).build(OffsetDateTime::UNIX_EPOCH);
        let event = AcquisitionEvent::Reading {
            source: SourceKind::Polling,
            reading,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reading");
        assert_eq!(json["source"], "polling");
        assert_eq!(json["reading"]["aqi_category"], "good");

        let event = AcquisitionEvent::Disconnected {
            source: SourceKind::Subscription,
            reason: DisconnectReason::Error("refused".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"]["error"], "refused");
    }
}
