use crate::request::RequestStatus;
use thiserror::Error;

/// Kind of entity an error or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Request,
    Agent,
    Notification,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Request => write!(f, "request"),
            EntityKind::Agent => write!(f, "agent"),
            EntityKind::Notification => write!(f, "notification"),
        }
    }
}

/// Domain errors raised by the dispatch engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error(
        "stale state for request '{id}': expected {expected} (v{expected_version:?}), \
         found {actual} (v{actual_version})"
    )]
    StaleState {
        id: String,
        expected: RequestStatus,
        expected_version: Option<u64>,
        actual: RequestStatus,
        actual_version: u64,
    },

    #[error("request '{0}' was already claimed")]
    AlreadyClaimed(String),

    #[error("request '{0}' was already rated")]
    AlreadyRated(String),

    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not allowed to act on this request")]
    NotOwner(String),

    #[error("agent '{agent_id}' already holds active mission '{request_id}'")]
    AgentBusy { agent_id: String, request_id: String },

    #[error("agent '{0}' is offline or not verified")]
    AgentUnavailable(String),
}

impl DispatchError {
    pub fn request_not_found(id: &str) -> Self {
        DispatchError::NotFound {
            kind: EntityKind::Request,
            id: id.to_string(),
        }
    }

    pub fn agent_not_found(id: &str) -> Self {
        DispatchError::NotFound {
            kind: EntityKind::Agent,
            id: id.to_string(),
        }
    }

    /// Routine contention: absorbed by the caller, never surfaced loudly
    pub fn is_contention(&self) -> bool {
        matches!(self, DispatchError::AlreadyClaimed(_))
    }

    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::StaleState { .. } => "stale_state",
            DispatchError::AlreadyClaimed(_) => "already_claimed",
            DispatchError::AlreadyRated(_) => "already_rated",
            DispatchError::InvalidCoordinate { .. } => "invalid_coordinate",
            DispatchError::InvalidRating(_) => "invalid_rating",
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::NotOwner(_) => "not_owner",
            DispatchError::AgentBusy { .. } => "agent_busy",
            DispatchError::AgentUnavailable(_) => "agent_unavailable",
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
