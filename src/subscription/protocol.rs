use crate::error::EntityKind;
use crate::notify::{ChangeEvent, EventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Narrow the feed to this entity (repeatable)
    #[serde(rename = "subscribe")]
    Subscribe { entity_id: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { entity_id: String },
}

/// Server → Client: one change event
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEventMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub event_id: String,
    pub kind: EventKind,
    pub entity: EntityKind,
    pub entity_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl From<ChangeEvent> for ChangeEventMessage {
    fn from(event: ChangeEvent) -> Self {
        Self {
            msg_type: "change_event".to_string(),
            event_id: event.id,
            kind: event.kind,
            entity: event.entity,
            entity_id: event.entity_id,
            payload: event.payload,
            timestamp: event.delivered_at,
        }
    }
}

/// Server → Client: events were dropped, re-read state over HTTP
#[derive(Debug, Clone, Serialize)]
pub struct ResyncMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub skipped: u64,
}

impl ResyncMessage {
    pub fn new(skipped: u64) -> Self {
        Self {
            msg_type: "resync".to_string(),
            skipped,
        }
    }
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}
