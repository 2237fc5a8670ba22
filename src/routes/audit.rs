use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::activity::{ActivityLevel, ActivitySource};
use crate::audit::report::{AuditReportSummary, RunComparison, TrendPoint};
use crate::audit::{AuditRun, Target};
use crate::config::{DEFAULT_RUN_LIST_LIMIT, DEFAULT_TREND_LIMIT};
use crate::error::AuditError;
use crate::state::{AuditCoordinator, AuditStatus, SharedState};

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFullRequest {
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPageRequest {
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
    pub page_path: String,
}

fn default_initiator() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    pub limit: usize,
}

fn default_activity_limit() -> usize {
    100
}

// ============================================================================
// Run control
// ============================================================================

/// POST /audit/full: run a full audit to completion and return the final run.
pub async fn start_full(
    State(state): State<SharedState>,
    Json(req): Json<StartFullRequest>,
) -> Result<Json<AuditRun>, AuditError> {
    let stop_rx = state.coordinator.try_begin().await?;
    state
        .activity
        .emit(
            ActivitySource::Api,
            ActivityLevel::Info,
            None,
            format!("Full audit requested by {}", req.initiated_by),
        )
        .await;

    let engine = state.engine.clone();
    let coordinator = state.coordinator.clone();
    // Detached so a dropped client connection cannot leave the run half-finished.
    let handle = tokio::spawn(async move {
        let result = engine.start_full_audit(&req.initiated_by, Some(stop_rx)).await;
        coordinator.finish().await;
        result
    });

    let run = join_audit(&state.coordinator, handle).await?;
    Ok(Json(run))
}

/// POST /audit/page: audit one registered page and its service dependencies.
pub async fn start_page(
    State(state): State<SharedState>,
    Json(req): Json<StartPageRequest>,
) -> Result<Json<AuditRun>, AuditError> {
    let stop_rx = state.coordinator.try_begin().await?;
    state
        .activity
        .emit(
            ActivitySource::Api,
            ActivityLevel::Info,
            None,
            format!("Page audit of {} requested by {}", req.page_path, req.initiated_by),
        )
        .await;

    let engine = state.engine.clone();
    let coordinator = state.coordinator.clone();
    let handle = tokio::spawn(async move {
        let result = engine
            .start_page_audit(&req.initiated_by, &req.page_path, Some(stop_rx))
            .await;
        coordinator.finish().await;
        result
    });

    let run = join_audit(&state.coordinator, handle).await?;
    Ok(Json(run))
}

/// Await a spawned audit. A task that panicked never reached its own
/// `finish()`, so the slot is released here.
async fn join_audit(
    coordinator: &AuditCoordinator,
    handle: JoinHandle<Result<AuditRun, AuditError>>,
) -> Result<AuditRun, AuditError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            coordinator.finish().await;
            Err(AuditError::Store(anyhow::anyhow!("audit task aborted: {}", e)))
        }
    }
}

/// POST /audit/stop
pub async fn stop(State(state): State<SharedState>) -> Json<MessageResponse> {
    if !state.coordinator.stop().await {
        return Json(MessageResponse {
            ok: false,
            message: "No audit in progress".to_string(),
        });
    }

    state
        .activity
        .emit(ActivitySource::Api, ActivityLevel::Warn, None, "Stop requested")
        .await;
    Json(MessageResponse {
        ok: true,
        message: "Stop signal sent".to_string(),
    })
}

/// GET /audit/status
pub async fn status(State(state): State<SharedState>) -> Json<AuditStatus> {
    Json(state.coordinator.status().await)
}

// ============================================================================
// Runs and reports
// ============================================================================

/// GET /audit/runs: newest first.
pub async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<AuditRun>>, AuditError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIST_LIMIT);
    Ok(Json(state.engine.list_runs(limit)?))
}

/// GET /audit/runs/{id}
pub async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<AuditRun>, AuditError> {
    Ok(Json(state.engine.get_run(&run_id)?))
}

/// GET /audit/runs/{id}/report
pub async fn run_report(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<AuditReportSummary>, AuditError> {
    Ok(Json(state.engine.generate_report(&run_id)?))
}

/// GET /audit/compare/{a}/{b}: `a` is the baseline.
pub async fn compare(
    State(state): State<SharedState>,
    Path((baseline, current)): Path<(String, String)>,
) -> Result<Json<RunComparison>, AuditError> {
    Ok(Json(state.engine.compare_runs(&baseline, &current)?))
}

/// GET /audit/targets
pub async fn targets(State(state): State<SharedState>) -> Result<Json<Vec<Target>>, AuditError> {
    Ok(Json(state.engine.all_targets()?))
}

/// GET /audit/trend: completed runs, oldest first.
pub async fn trend(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<TrendPoint>>, AuditError> {
    let limit = query.limit.unwrap_or(DEFAULT_TREND_LIMIT);
    Ok(Json(state.engine.trend(limit)?))
}

// ============================================================================
// Activity
// ============================================================================

/// GET /audit/activity: most recent entries first.
pub async fn activity_history(
    State(state): State<SharedState>,
    Query(query): Query<ActivityQuery>,
) -> Json<serde_json::Value> {
    let entries = state.activity.history().await;
    let total = entries.len();
    let entries: Vec<_> = entries.into_iter().rev().take(query.limit).collect();

    Json(serde_json::json!({
        "entries": entries,
        "total": total,
        "limit": query.limit,
    }))
}

/// GET /audit/activity/stream: SSE stream of new activity entries.
pub async fn activity_stream(
    State(state): State<SharedState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.activity.subscribe());

    let event_stream = stream.filter_map(|result| match result {
        Ok(entry) => {
            let data = serde_json::to_string(&entry).unwrap_or_default();
            Some(Ok(Event::default().event("activity").data(data)))
        }
        // Lagged receivers skip what they missed.
        Err(_) => None,
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}
