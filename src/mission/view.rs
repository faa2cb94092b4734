use crate::agent::PositionSample;
use crate::error::DispatchResult;
use crate::geo;
use crate::request::Request;
use serde::Serialize;

/// A mission annotated with the agent's live distance and ETA.
///
/// Read-time projection: recomputed from the latest position sample and
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionView {
    pub request: Request,
    pub agent_position: Option<PositionSample>,
    /// Kilometres to the pickup, rounded to 0.1 km
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<u32>,
}

impl MissionView {
    pub fn project(
        request: Request,
        agent_position: Option<PositionSample>,
        speed_kmh: f64,
    ) -> DispatchResult<Self> {
        let (distance_km, eta_minutes) = match agent_position {
            Some(position) => {
                let d = geo::distance(position.coordinate(), request.pickup)?;
                (Some(geo::round_km(d)), Some(geo::eta_at(d, speed_kmh)))
            }
            None => (None, None),
        };

        Ok(Self {
            request,
            agent_position,
            distance_km,
            eta_minutes,
        })
    }
}
