// HTTP and WebSocket APIs

pub mod agents;
pub mod metrics;
pub mod notifications;
pub mod requests;
pub mod websocket;

pub use agents::create_agent_router;
pub use metrics::create_metrics_router;
pub use notifications::create_notification_router;
pub use requests::create_request_router;
pub use websocket::{create_ws_router, ws_handler};

use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Full API surface over one engine
pub fn create_api_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .merge(create_request_router(Arc::clone(&engine)))
        .merge(create_agent_router(Arc::clone(&engine)))
        .merge(create_notification_router(Arc::clone(&engine)))
        .merge(create_metrics_router(Arc::clone(&engine)))
        .merge(create_ws_router(engine))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Dispatch(DispatchError),
    /// Malformed query or body the domain never saw
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

fn status_for(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
        DispatchError::AlreadyClaimed(_)
        | DispatchError::AlreadyRated(_)
        | DispatchError::StaleState { .. }
        | DispatchError::InvalidTransition { .. }
        | DispatchError::AgentBusy { .. }
        | DispatchError::AgentUnavailable(_) => StatusCode::CONFLICT,
        DispatchError::NotOwner(_) => StatusCode::FORBIDDEN,
        DispatchError::InvalidCoordinate { .. }
        | DispatchError::InvalidRating(_)
        | DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::Dispatch(e) => (status_for(&e), e.to_string(), e.code()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "invalid_request"),
            ApiError::Internal(e) => {
                error!(error = %e, "Internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    "internal",
                )
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityKind;
    use crate::request::RequestStatus;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let cases = vec![
            (DispatchError::request_not_found("r"), StatusCode::NOT_FOUND),
            (DispatchError::AlreadyClaimed("r".into()), StatusCode::CONFLICT),
            (DispatchError::AlreadyRated("r".into()), StatusCode::CONFLICT),
            (
                DispatchError::InvalidTransition {
                    from: RequestStatus::Pending,
                    to: RequestStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (DispatchError::NotOwner("a".into()), StatusCode::FORBIDDEN),
            (DispatchError::AgentUnavailable("a".into()), StatusCode::CONFLICT),
            (DispatchError::InvalidRating(9), StatusCode::BAD_REQUEST),
            (
                DispatchError::InvalidCoordinate {
                    latitude: 91.0,
                    longitude: 0.0,
                },
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            let code = err.code();
            let (status, body) = body_of(ApiError::from(err)).await;
            assert_eq!(status, expected, "status for {}", code);
            assert_eq!(body["code"], code);
        }
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let err = DispatchError::NotFound {
            kind: EntityKind::Agent,
            id: "agent-1".to_string(),
        };
        let (_, body) = body_of(err.into()).await;
        assert_eq!(body["error"], "agent 'agent-1' not found");
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let (status, body) = body_of(anyhow::anyhow!("disk on fire").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal error");
        assert_eq!(body["code"], "internal");
    }
}
