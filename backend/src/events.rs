//! Event broadcasting for policy observers.

use audio_policy_types::PolicyEvent;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

/// Fan-out of [`PolicyEvent`]s to every subscriber.
#[derive(Clone)]
pub struct EventBroadcaster {
    /// Broadcast channel for events
    sender: Arc<broadcast::Sender<PolicyEvent>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: PolicyEvent) {
        debug!("Broadcasting event: {}", event.description());
        // Nobody may be listening, which is fine
        let _ = self.sender.send(event);
    }

    /// Raw receiver, for callers that want to await events one by one.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.sender.subscribe()
    }

    /// Subscribe and get every event serialized as one JSON line.
    pub fn subscribe_json(&self) -> impl Stream<Item = String> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // BroadcastStream returns RecvError when lagging
                tracing::warn!("Subscriber lagging, skipping events: {}", e);
                None
            }
        })
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100) // Default buffer of 100 events
    }
}
