use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub base_url: String,
    pub audit_running: bool,
    pub registered_pages: usize,
    pub registered_apis: usize,
}

/// GET /health: liveness plus a little context about what would be audited.
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let registry = state.engine.registry();
    let audit_running = state.coordinator.status().await.running;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        base_url: state.config.base_url.clone(),
        audit_running,
        registered_pages: registry.pages.len(),
        registered_apis: registry.apis.len(),
    })
}
