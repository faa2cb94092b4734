use super::ApiError;
use crate::engine::DispatchEngine;
use crate::error::{DispatchError, EntityKind};
use crate::notify::Notification;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Create notification API router
pub fn create_notification_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/:id/read", post(mark_read))
        .with_state(engine)
}

#[derive(Deserialize)]
struct ListQuery {
    recipient_id: String,
    #[serde(default)]
    unread_only: bool,
}

/// GET /api/notifications?recipient_id=&unread_only=
async fn list_notifications(
    State(engine): State<Arc<DispatchEngine>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications = engine.notifications(&params.recipient_id, params.unread_only)?;
    Ok(Json(notifications))
}

/// POST /api/notifications/:id/read
async fn mark_read(
    State(engine): State<Arc<DispatchEngine>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if engine.mark_notification_read(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(DispatchError::NotFound {
            kind: EntityKind::Notification,
            id,
        }
        .into())
    }
}
