//! Event types for the clipdeck event system
//!
//! Provides the shared player event definitions and the EventBus used to
//! notify collaborators (console, shells, overlays) about playback activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Player event types
///
/// Events are broadcast via EventBus and can be serialized to JSON for
/// external consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Queue contents changed (enqueue, advance, removal, skip-all)
    QueueChanged {
        /// Number of entries waiting after the change
        queue_len: usize,
        timestamp: DateTime<Utc>,
    },

    /// A track became current and its device was started
    TrackStarted {
        /// Catalog id of the track
        track_id: i64,
        /// Display name
        name: String,
        /// Output device index the track is bound to
        device_index: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Current track ran out of audio (natural end or skip)
    TrackFinished {
        track_id: i64,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Something failed while serving a request
    ///
    /// The engine keeps running; only the affected track is abandoned.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Output device list was rebuilt after a failure or rate change
    DevicesReinitialized {
        device_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::TrackStarted { .. } => "TrackStarted",
            PlayerEvent::TrackFinished { .. } => "TrackFinished",
            PlayerEvent::Error { .. } => "Error",
            PlayerEvent::DevicesReinitialized { .. } => "DevicesReinitialized",
        }
    }

    /// Build an `Error` event stamped with the current time
    pub fn error(message: impl Into<String>) -> Self {
        PlayerEvent::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Broadcast bus for player events
///
/// Cloning the bus shares the underlying channel.
///
/// # Examples
///
/// ```
/// use clipdeck_common::events::{EventBus, PlayerEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit(PlayerEvent::error("device lost")).ok();
/// assert_eq!(rx.try_recv().unwrap().event_type(), "Error");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per slow receiver before
    /// the oldest ones are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        assert!(bus.emit(PlayerEvent::error("nobody home")).is_err());
        // Lossy variant never complains
        bus.emit_lossy(PlayerEvent::error("nobody home"));
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(PlayerEvent::QueueChanged {
            queue_len: 1,
            timestamp: Utc::now(),
        });
        bus.emit_lossy(PlayerEvent::TrackFinished {
            track_id: 3,
            name: "intro".to_string(),
            timestamp: Utc::now(),
        });

        assert_eq!(rx.try_recv().unwrap().event_type(), "QueueChanged");
        assert_eq!(rx.try_recv().unwrap().event_type(), "TrackFinished");
    }

    #[test]
    fn test_json_is_tagged() {
        let event = PlayerEvent::TrackStarted {
            track_id: 7,
            name: "airhorn".to_string(),
            device_index: Some(1),
            timestamp: Utc::now(),
        };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"TrackStarted\""));
        assert!(json.contains("\"track_id\":7"));

        let back: PlayerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "TrackStarted");
    }
}
