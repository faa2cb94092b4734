use crate::engine::metrics::EngineMetrics;
use crate::notify::{ChangeEvent, Subscriber, SubscriberError};
use crate::subscription::protocol::{ChangeEventMessage, ClientMessage, ErrorMessage, ResyncMessage};
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the connection loop does after handling one input
enum Step {
    Continue,
    Reply(String),
    Close,
}

/// One live WebSocket session on top of a filtered [`Subscriber`].
///
/// Clients may narrow the feed to specific entity ids; with no ids every event
/// the subscriber's filter admits is forwarded.
pub struct ConnectionManager {
    subscriptions: HashSet<String>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashSet::new(),
        }
    }

    /// Pump frames both ways until either side goes away
    pub async fn handle(
        mut self,
        mut socket: WebSocket,
        mut subscriber: Subscriber,
        metrics: Arc<EngineMetrics>,
    ) {
        metrics.increment_ws_connection();
        info!(filter = ?subscriber.filter(), "Live feed opened");

        loop {
            let step = tokio::select! {
                frame = socket.recv() => match frame {
                    Some(Ok(message)) => self.on_frame(message),
                    Some(Err(e)) => {
                        debug!(error = %e, "Socket read failed");
                        Step::Close
                    }
                    None => Step::Close,
                },
                event = subscriber.recv() => self.on_event(event),
            };

            let outgoing = match step {
                Step::Continue => continue,
                Step::Close => break,
                Step::Reply(text) => Message::Text(text),
            };
            if let Err(e) = socket.send(outgoing).await {
                warn!(error = %e, "Live feed write failed");
                break;
            }
        }

        metrics.decrement_ws_connection();
        info!("Live feed closed");
    }

    fn on_frame(&mut self, message: Message) -> Step {
        match message {
            Message::Text(text) => match self.handle_client_message(&text) {
                Ok(()) => Step::Continue,
                Err(e) => {
                    warn!(error = %e, "Rejected client message");
                    encode(&ErrorMessage::new(format!("invalid message: {}", e)))
                }
            },
            Message::Close(_) => Step::Close,
            // axum answers pings itself
            _ => Step::Continue,
        }
    }

    fn on_event(&self, event: Result<ChangeEvent, SubscriberError>) -> Step {
        match event {
            Ok(event) if self.should_forward(&event) => encode(&ChangeEventMessage::from(event)),
            Ok(_) => Step::Continue,
            // Client re-reads authoritative state
            Err(SubscriberError::Lagged(skipped)) => encode(&ResyncMessage::new(skipped)),
            Err(SubscriberError::Closed) => {
                error!("Event channel closed under a live feed");
                Step::Close
            }
        }
    }

    fn handle_client_message(&mut self, text: &str) -> anyhow::Result<()> {
        match serde_json::from_str::<ClientMessage>(text)? {
            ClientMessage::Subscribe { entity_id } => {
                debug!(entity_id = %entity_id, "Feed narrowed");
                self.subscriptions.insert(entity_id);
            }
            ClientMessage::Unsubscribe { entity_id } => {
                debug!(entity_id = %entity_id, "Feed widened");
                self.subscriptions.remove(&entity_id);
            }
        }
        Ok(())
    }

    fn should_forward(&self, event: &ChangeEvent) -> bool {
        if self.subscriptions.is_empty() || self.subscriptions.contains(&event.entity_id) {
            return true;
        }

        // Position events are keyed by agent; follow them through the mission
        event
            .payload
            .pointer("/mission/request/id")
            .and_then(|id| id.as_str())
            .is_some_and(|id| self.subscriptions.contains(id))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn encode<T: Serialize>(message: &T) -> Step {
    match serde_json::to_string(message) {
        Ok(text) => Step::Reply(text),
        Err(e) => {
            error!(error = %e, "Failed to encode outgoing message");
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityKind;
    use crate::notify::{Audience, EventKind};
    use serde_json::json;

    fn event(entity_id: &str, payload: serde_json::Value) -> ChangeEvent {
        ChangeEvent::new(
            EventKind::RequestStatusChanged,
            EntityKind::Request,
            entity_id,
            Audience::default(),
            payload,
        )
    }

    #[test]
    fn test_empty_subscription_forwards_everything() {
        let manager = ConnectionManager::new();
        assert!(manager.should_forward(&event("req-1", json!({}))));
    }

    #[test]
    fn test_subscribe_and_unsubscribe_narrow_the_feed() {
        let mut manager = ConnectionManager::new();
        manager
            .handle_client_message(r#"{"type":"subscribe","entity_id":"req-1"}"#)
            .unwrap();

        assert!(manager.should_forward(&event("req-1", json!({}))));
        assert!(!manager.should_forward(&event("req-2", json!({}))));

        manager
            .handle_client_message(r#"{"type":"unsubscribe","entity_id":"req-1"}"#)
            .unwrap();
        assert!(manager.should_forward(&event("req-2", json!({}))));
    }

    #[test]
    fn test_position_event_follows_subscribed_mission() {
        let mut manager = ConnectionManager::new();
        manager
            .handle_client_message(r#"{"type":"subscribe","entity_id":"req-1"}"#)
            .unwrap();

        let position = event(
            "agent-7",
            json!({ "agent_id": "agent-7", "mission": { "request": { "id": "req-1" } } }),
        );
        assert!(manager.should_forward(&position));

        let unrelated = event("agent-8", json!({ "agent_id": "agent-8", "mission": null }));
        assert!(!manager.should_forward(&unrelated));
    }

    #[test]
    fn test_invalid_client_message_is_rejected() {
        let mut manager = ConnectionManager::new();
        assert!(manager.handle_client_message("not json").is_err());
        assert!(manager.subscriptions.is_empty());
    }
}
