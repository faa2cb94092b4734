use crate::engine::metrics::MetricsSnapshot;
use crate::engine::DispatchEngine;
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

/// Create metrics router
pub fn create_metrics_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/metrics", get(get_metrics))
        .with_state(engine)
}

/// GET /api/metrics - engine counters
async fn get_metrics(State(engine): State<Arc<DispatchEngine>>) -> Json<MetricsSnapshot> {
    Json(engine.metrics_snapshot())
}
