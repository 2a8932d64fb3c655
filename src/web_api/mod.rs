//! Web API - operational surface
//!
//! ## Responsibilities
//!
//! - `GET /healthz`: process liveness plus broker/recorder visibility

use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// GET /healthz
async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "broker_connected": state.broker.is_connected(),
        "live_recorders": state.recorder.live_count(),
    }))
}
