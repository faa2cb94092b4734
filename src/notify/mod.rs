// Change-event fan-out to live observers

mod dispatcher;
mod notifier;
mod store;

pub use dispatcher::{Dispatcher, Subscriber, SubscriberError};
pub use notifier::Notifier;
pub use store::{Notification, NotificationStore};


use crate::error::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    RequestClaimed,
    RequestStatusChanged,
    RequestRated,
    AgentOnlineChanged,
    AgentPositionChanged,
    NotificationCreated,
}

/// Who should receive an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    /// The requester's sessions
    pub requester_id: Option<String>,
    /// The agent's sessions
    pub agent_id: Option<String>,
    /// Every agent that is online at delivery time
    pub online_agents: bool,
}

impl Audience {
    pub fn requester(id: &str) -> Self {
        Self {
            requester_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn agent(id: &str) -> Self {
        Self {
            agent_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn online_agents() -> Self {
        Self {
            online_agents: true,
            ..Default::default()
        }
    }

    pub fn with_requester(mut self, id: &str) -> Self {
        self.requester_id = Some(id.to_string());
        self
    }

    pub fn with_agent(mut self, id: Option<&str>) -> Self {
        self.agent_id = id.map(str::to_string);
        self
    }
}

/// Notification of a Request, Agent or Notification mutation.
///
/// Transient: consumed once by each subscriber, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub kind: EventKind,
    pub entity: EntityKind,
    pub entity_id: String,
    pub audience: Audience,
    /// Snapshot of the entity after the mutation
    pub payload: Value,
    pub delivered_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        kind: EventKind,
        entity: EntityKind,
        entity_id: &str,
        audience: Audience,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            entity,
            entity_id: entity_id.to_string(),
            audience,
            payload,
            delivered_at: Utc::now(),
        }
    }
}

/// Session owner a subscription is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Owner {
    Requester(String),
    Agent(String),
}

/// Subscription filter: entity kind and, optionally, the owning session.
///
/// `owner: None` receives every event (operator console).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub entity: Option<EntityKind>,
    pub owner: Option<Owner>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn requester(id: &str) -> Self {
        Self {
            entity: None,
            owner: Some(Owner::Requester(id.to_string())),
        }
    }

    pub fn agent(id: &str) -> Self {
        Self {
            entity: None,
            owner: Some(Owner::Agent(id.to_string())),
        }
    }

    pub fn with_entity(mut self, entity: EntityKind) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Decide delivery. `is_online` is consulted only for broadcast-to-agents events.
    pub fn matches(&self, event: &ChangeEvent, is_online: impl Fn(&str) -> bool) -> bool {
        if let Some(entity) = self.entity {
            if event.entity != entity {
                return false;
            }
        }

        match &self.owner {
            None => true,
            Some(Owner::Requester(id)) => event.audience.requester_id.as_deref() == Some(id),
            Some(Owner::Agent(id)) => {
                event.audience.agent_id.as_deref() == Some(id)
                    || (event.audience.online_agents && is_online(id))
            }
        }
    }
}
