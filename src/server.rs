use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(crate::routes::health::health))
        // Run control
        .route("/audit/full", post(crate::routes::audit::start_full))
        .route("/audit/page", post(crate::routes::audit::start_page))
        .route("/audit/stop", post(crate::routes::audit::stop))
        .route("/audit/status", get(crate::routes::audit::status))
        // Runs and reports
        .route("/audit/runs", get(crate::routes::audit::list_runs))
        .route("/audit/runs/{id}", get(crate::routes::audit::get_run))
        .route("/audit/runs/{id}/report", get(crate::routes::audit::run_report))
        .route("/audit/compare/{a}/{b}", get(crate::routes::audit::compare))
        .route("/audit/targets", get(crate::routes::audit::targets))
        .route("/audit/trend", get(crate::routes::audit::trend))
        // Activity
        .route("/audit/activity", get(crate::routes::audit::activity_history))
        .route(
            "/audit/activity/stream",
            get(crate::routes::audit::activity_stream),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
