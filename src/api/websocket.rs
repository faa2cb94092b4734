use super::ApiError;
use crate::engine::DispatchEngine;
use crate::error::EntityKind;
use crate::notify::SubscriptionFilter;
use crate::subscription::ConnectionManager;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Query parameters for WebSocket upgrade
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    requester_id: Option<String>,
    agent_id: Option<String>,
    entity: Option<EntityKind>,
}

impl WsQuery {
    /// Scope the feed to one session; neither id means the operator view
    fn filter(&self) -> Result<SubscriptionFilter, ApiError> {
        let filter = match (&self.requester_id, &self.agent_id) {
            (Some(_), Some(_)) => {
                return Err(ApiError::BadRequest(
                    "give requester_id or agent_id, not both".to_string(),
                ))
            }
            (Some(id), None) => SubscriptionFilter::requester(id),
            (None, Some(id)) => SubscriptionFilter::agent(id),
            (None, None) => SubscriptionFilter::all(),
        };

        Ok(match self.entity {
            Some(entity) => filter.with_entity(entity),
            None => filter,
        })
    }
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<DispatchEngine>>,
    Query(params): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let filter = params.filter()?;
    info!(filter = ?filter, "WebSocket upgrade request received");

    // Subscribe before the upgrade so no event slips between the two
    let subscriber = engine.subscribe(filter);
    let metrics = Arc::clone(engine.metrics());

    Ok(ws.on_upgrade(move |socket| {
        ConnectionManager::new().handle(socket, subscriber, metrics)
    }))
}

/// Create WebSocket router
pub fn create_ws_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(engine)
}
