// Request records and their lifecycle status

mod store;

pub use store::RequestStore;


use crate::error::{DispatchError, DispatchResult};
use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sanitation services a client can order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    SepticTankEmptying,
    LatrineEmptying,
    GreaseTrapCleaning,
    WastewaterPumping,
    DrainUnclogging,
}

/// Mission lifecycle status, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    InProgress,
    Arrived,
    Working,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Completed and cancelled requests never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// True for statuses that bind an agent to an ongoing mission
    pub fn is_active_mission(&self) -> bool {
        matches!(
            self,
            RequestStatus::Accepted
                | RequestStatus::InProgress
                | RequestStatus::Arrived
                | RequestStatus::Working
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Arrived => "arrived",
            RequestStatus::Working => "working",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "in_progress" => Ok(RequestStatus::InProgress),
            "arrived" => Ok(RequestStatus::Arrived),
            "working" => Ok(RequestStatus::Working),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Price quoted to the client, in minor currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pricing {
    Fixed { amount: u64 },
    Band { min: u64, max: u64 },
}

impl Pricing {
    pub fn validate(&self) -> DispatchResult<()> {
        match *self {
            Pricing::Fixed { .. } => Ok(()),
            Pricing::Band { min, max } if min <= max => Ok(()),
            Pricing::Band { min, max } => Err(DispatchError::InvalidRequest(format!(
                "price band minimum {} exceeds maximum {}",
                min, max
            ))),
        }
    }
}

/// Client-supplied details for a new request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetails {
    pub service_kind: ServiceKind,
    pub pickup: Coordinate,
    #[serde(default)]
    pub address: String,
    pub pricing: Pricing,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A unit of work: one service order awaiting or undergoing fulfillment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub requester_id: String,
    pub service_kind: ServiceKind,
    pub pickup: Coordinate,
    pub address: String,
    pub pricing: Pricing,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every mutation; the optimistic concurrency token
    pub version: u64,
    pub rating: Option<u8>,
}

impl Request {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_assigned_to(&self, agent_id: &str) -> bool {
        self.assigned_agent_id.as_deref() == Some(agent_id)
    }
}

/// Pending request annotated with its distance from an observer
#[derive(Debug, Clone, Serialize)]
pub struct RequestWithDistance {
    pub request: Request,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub within_radius: bool,
}
