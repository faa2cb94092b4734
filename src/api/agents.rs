use super::ApiError;
use crate::agent::{Agent, PositionSample};
use crate::engine::DispatchEngine;
use crate::request::{Request, RequestStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Create agent API router
pub fn create_agent_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/agents", post(register_agent).get(list_agents))
        .route("/api/agents/:id", get(get_agent))
        .route("/api/agents/:id/missions", get(list_missions))
        .route("/api/agents/:id/online", put(set_online))
        .route("/api/agents/:id/position", post(report_position))
        .with_state(engine)
}

#[derive(Deserialize)]
struct RegisterBody {
    identity_ref: String,
    #[serde(default)]
    vehicle: String,
    #[serde(default)]
    verified: bool,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    online: bool,
}

#[derive(Deserialize)]
struct MissionsQuery {
    /// Comma-separated statuses, e.g. `accepted,in_progress`
    status: Option<String>,
}

#[derive(Deserialize)]
struct OnlineBody {
    online: bool,
}

#[derive(Deserialize)]
struct PositionBody {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: f64,
    /// Device capture time; defaults to receipt time
    captured_at: Option<DateTime<Utc>>,
}

/// POST /api/agents
async fn register_agent(
    State(engine): State<Arc<DispatchEngine>>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let agent = engine.register_agent(&body.identity_ref, &body.vehicle, body.verified)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /api/agents?online=true
async fn list_agents(
    State(engine): State<Arc<DispatchEngine>>,
    Query(params): Query<ListQuery>,
) -> Json<Vec<Agent>> {
    Json(engine.list_agents(params.online))
}

/// GET /api/agents/:id
async fn get_agent(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(engine.get_agent(&id)?))
}

/// GET /api/agents/:id/missions?status=
async fn list_missions(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Query(params): Query<MissionsQuery>,
) -> Result<Json<Vec<Request>>, ApiError> {
    let statuses = match params.status.as_deref() {
        Some(raw) => parse_statuses(raw)?,
        None => Vec::new(),
    };
    Ok(Json(engine.missions_for_agent(&id, &statuses)?))
}

fn parse_statuses(raw: &str) -> Result<Vec<RequestStatus>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<RequestStatus>().map_err(ApiError::BadRequest))
        .collect()
}

/// PUT /api/agents/:id/online
async fn set_online(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<OnlineBody>,
) -> Result<Json<Agent>, ApiError> {
    Ok(Json(engine.set_online(&id, body.online)?))
}

/// POST /api/agents/:id/position
///
/// Queues the reading for the agent's tracking loop; it is applied on the
/// loop's next tick.
async fn report_position(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<PositionBody>,
) -> Result<StatusCode, ApiError> {
    let mut sample = PositionSample::new(body.latitude, body.longitude, body.accuracy);
    if let Some(captured_at) = body.captured_at {
        sample.captured_at = captured_at;
    }

    engine.report_position(&id, sample)?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statuses() {
        assert_eq!(
            parse_statuses("accepted, in_progress").unwrap(),
            vec![RequestStatus::Accepted, RequestStatus::InProgress]
        );
        assert!(parse_statuses("").unwrap().is_empty());
        assert!(parse_statuses("accepted,teleported").is_err());
    }
}
