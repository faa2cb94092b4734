use super::ApiError;
use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use crate::geo::{Coordinate, NavigationApp};
use crate::mission::{Expected, MissionView};
use crate::request::{Request, RequestDetails, RequestStatus, RequestWithDistance};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Create request API router
pub fn create_request_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/requests", post(create_request).get(list_requests))
        .route("/api/requests/pending", get(pending_requests))
        .route("/api/requests/:id", get(get_request))
        .route("/api/requests/:id/claim", post(claim_request))
        .route("/api/requests/:id/decline", post(decline_request))
        .route("/api/requests/:id/transition", post(transition_request))
        .route("/api/requests/:id/cancel", post(cancel_request))
        .route("/api/requests/:id/rating", post(rate_request))
        .route("/api/requests/:id/view", get(view_request))
        .route("/api/requests/:id/navigation", get(navigation_link))
        .with_state(engine)
}

#[derive(Deserialize)]
struct CreateRequestBody {
    requester_id: String,
    #[serde(flatten)]
    details: RequestDetails,
}

#[derive(Deserialize)]
struct ListQuery {
    requester_id: Option<String>,
}

#[derive(Deserialize)]
struct PendingQuery {
    agent_id: String,
    lat: Option<f64>,
    lon: Option<f64>,
    radius_km: Option<f64>,
}

#[derive(Deserialize)]
struct AgentBody {
    agent_id: String,
}

#[derive(Deserialize)]
struct TransitionBody {
    agent_id: String,
    expected: Expected,
    next: RequestStatus,
}

/// Requester cancellations carry `requester_id`; operator cancellations
/// omit it and give a `reason`.
#[derive(Deserialize)]
struct CancelBody {
    requester_id: Option<String>,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct RatingBody {
    requester_id: String,
    /// Range-checked by the handler
    rating: i64,
}

#[derive(Deserialize)]
struct NavigationQuery {
    app: Option<String>,
}

#[derive(Serialize)]
struct NavigationResponse {
    app: NavigationApp,
    url: String,
}

/// POST /api/requests
async fn create_request(
    State(engine): State<Arc<DispatchEngine>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    let request = engine.create_request(&body.requester_id, body.details).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /api/requests?requester_id=
async fn list_requests(
    State(engine): State<Arc<DispatchEngine>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<Request>>, ApiError> {
    let requester_id = params
        .requester_id
        .ok_or_else(|| ApiError::BadRequest("requester_id is required".to_string()))?;
    Ok(Json(engine.requests_for_requester(&requester_id)))
}

/// GET /api/requests/pending?agent_id=&lat=&lon=&radius_km=
///
/// Without lat/lon the agent's last known position is the origin.
async fn pending_requests(
    State(engine): State<Arc<DispatchEngine>>,
    Query(params): Query<PendingQuery>,
) -> Result<Json<Vec<RequestWithDistance>>, ApiError> {
    let origin = match (params.lat, params.lon) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "lat and lon must be given together".to_string(),
            ))
        }
    };

    let pending = engine.pending_for(&params.agent_id, origin, params.radius_km)?;
    Ok(Json(pending))
}

/// GET /api/requests/:id
async fn get_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
) -> Result<Json<Request>, ApiError> {
    Ok(Json(engine.get_request(&id)?))
}

/// POST /api/requests/:id/claim
async fn claim_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<AgentBody>,
) -> Result<Json<Request>, ApiError> {
    Ok(Json(engine.claim(&id, &body.agent_id)?))
}

/// POST /api/requests/:id/decline
async fn decline_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<AgentBody>,
) -> Result<StatusCode, ApiError> {
    engine.decline(&id, &body.agent_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/requests/:id/transition
async fn transition_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> Result<Json<Request>, ApiError> {
    let request = engine.advance(&id, &body.agent_id, body.expected, body.next)?;
    Ok(Json(request))
}

/// POST /api/requests/:id/cancel
async fn cancel_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Request>, ApiError> {
    let request = match (body.requester_id, body.reason) {
        (Some(requester_id), _) => engine.cancel_by_requester(&id, &requester_id)?,
        (None, Some(reason)) => engine.cancel_external(&id, &reason)?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "requester_id or reason is required".to_string(),
            ))
        }
    };
    Ok(Json(request))
}

/// POST /api/requests/:id/rating
async fn rate_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Json(body): Json<RatingBody>,
) -> Result<Json<Request>, ApiError> {
    let rating =
        u8::try_from(body.rating).map_err(|_| DispatchError::InvalidRating(body.rating))?;
    Ok(Json(engine.rate(&id, &body.requester_id, rating)?))
}

/// GET /api/requests/:id/view
async fn view_request(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
) -> Result<Json<MissionView>, ApiError> {
    Ok(Json(engine.mission_view(&id)?))
}

/// GET /api/requests/:id/navigation?app=google_maps|waze|apple_maps
async fn navigation_link(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
    Query(params): Query<NavigationQuery>,
) -> Result<Json<NavigationResponse>, ApiError> {
    let app = match params.app {
        Some(app) => app.parse::<NavigationApp>().map_err(ApiError::BadRequest)?,
        None => NavigationApp::GoogleMaps,
    };

    let url = engine.navigation_link(&id, app)?;
    Ok(Json(NavigationResponse { app, url }))
}
