//! Real-time fan-out of state changes to connected observers.
//!
//! At-most-once, no replay: an observer that connects late re-fetches full
//! state over the REST API. Lagging observers lose the messages they missed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const NEW_PLAYER: &str = "newPlayer";
pub const NEW_LEADER: &str = "newLeader";
pub const PLAYER_SOLD: &str = "playerSold";

/// One broadcast message as it goes over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

pub type EventReceiver = broadcast::Receiver<NotifierEvent>;

/// Cloneable handle; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventNotifier {
    sender: broadcast::Sender<NotifierEvent>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Fire-and-forget. Returns how many observers the event reached.
    pub fn publish(&self, event_name: &str, payload: serde_json::Value) -> usize {
        let event = NotifierEvent {
            event: event_name.to_string(),
            payload,
        };
        match self.sender.send(event) {
            Ok(n) => {
                tracing::debug!(event = event_name, observers = n, "Published event");
                n
            }
            // No observers connected
            Err(_) => 0,
        }
    }

    /// Serialize `value` and publish it; serialization failures are logged.
    pub fn publish_entity<T: Serialize>(&self, event_name: &str, value: &T) -> usize {
        match serde_json::to_value(value) {
            Ok(payload) => self.publish(event_name, payload),
            Err(e) => {
                tracing::error!(event = event_name, error = %e, "Failed to serialize event payload");
                0
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
