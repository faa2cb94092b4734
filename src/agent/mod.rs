// Agent presence, position and statistics

mod registry;

pub use registry::AgentRegistry;


use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ephemeral position reading from a location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    #[serde(default)]
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at: Utc::now(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// A field worker capable of fulfilling requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Reference into the external identity/account system
    pub identity_ref: String,
    pub online: bool,
    pub verified: bool,
    /// Latest sample only; no history is kept
    pub position: Option<PositionSample>,
    pub vehicle: String,
    pub rating_sum: u64,
    pub rating_count: u64,
    pub completed_missions: u64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Agent {
    /// Running aggregate rating, `None` until the first rating lands
    pub fn average_rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum as f64 / self.rating_count as f64)
        }
    }
}
