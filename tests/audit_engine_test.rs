use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{any, get};
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::watch;

use readiness_audit::audit::db::AuditDb;
use readiness_audit::audit::engine::AuditEngine;
use readiness_audit::audit::probe::ProbeRunner;
use readiness_audit::audit::store::AuditStore;
use readiness_audit::audit::{
    Classification, FixStatus, Priority, RecommendationType, RunStatus, RunType, TargetKind,
};
use readiness_audit::config::UnreachablePolicy;
use readiness_audit::error::AuditError;
use readiness_audit::registry::{ApiEntry, PageEntry, Registry};

/// A stand-in for the live platform, bound to an ephemeral local port.
/// `/api/flaky` answers 200 until `broken` is set, then 500.
async fn spawn_platform(broken: Arc<AtomicBool>) -> String {
    let app = Router::new()
        .route("/api/plans", get(|| async { "[]" }))
        .route("/api/projects", get(|| async { "[]" }))
        .route(
            "/api/admin/users",
            get(|| async { StatusCode::FORBIDDEN }),
        )
        .route(
            "/api/broken",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route(
            "/api/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        )
        .route(
            "/api/flaky",
            get(move || {
                let broken = broken.clone();
                async move {
                    if broken.load(Ordering::SeqCst) {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Requests the stand-in saw, as `(method, path, content-type)`.
type SeenRequests = Arc<Mutex<Vec<(Method, String, Option<String>)>>>;

/// A stand-in that answers every method on a couple of routes and records
/// how each request arrived.
async fn spawn_recording_platform(seen: SeenRequests) -> String {
    let record = |path: &'static str, seen: SeenRequests| {
        any(move |method: Method, headers: HeaderMap| {
            let seen = seen.clone();
            async move {
                let content_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                seen.lock()
                    .unwrap()
                    .push((method, path.to_string(), content_type));
                StatusCode::OK
            }
        })
    };
    let app = Router::new()
        .route("/api/plans", record("/api/plans", seen.clone()))
        .route("/api/auth/login", record("/api/auth/login", seen));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn engine_for(dir: &TempDir, registry: Registry) -> AuditEngine {
    engine_with_platform(dir, registry, Arc::new(AtomicBool::new(false))).await
}

async fn engine_with_platform(
    dir: &TempDir,
    registry: Registry,
    broken: Arc<AtomicBool>,
) -> AuditEngine {
    let base_url = spawn_platform(broken).await;
    let store = Arc::new(AuditDb::new(dir.path()).unwrap());
    let prober =
        ProbeRunner::new(&base_url, Duration::from_secs(1), UnreachablePolicy::Fail).unwrap();
    AuditEngine::new(store, Arc::new(registry), prober)
}

fn pricing_registry() -> Registry {
    Registry::new(
        vec![PageEntry::new("/pricing", "Pricing", "الأسعار")],
        vec![ApiEntry::new("GET", "/api/plans", "Plans", "الخطط")],
    )
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 0.01
}

#[tokio::test]
async fn test_pricing_page_and_plans_api_end_to_end() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir, pricing_registry()).await;

    let run = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.run_type, RunType::Full);
    assert_eq!(run.total_targets, 2);
    assert_eq!(run.tested_targets, 2);
    assert_eq!(run.passed_targets, 1);
    assert_eq!(run.partial_targets, 1);
    assert_eq!(run.failed_targets, 0);
    assert_eq!(run.readiness_score, 75.0);
    assert_eq!(run.breakdown.pages.partial, 1);
    assert_eq!(run.breakdown.apis.passed, 1);
    assert!(run.completed_at.is_some());
    assert!(run.duration_ms.is_some());

    let targets = engine.all_targets().unwrap();
    assert_eq!(targets.len(), 2);

    let report = engine.generate_report(&run.id).unwrap();
    let api = report
        .findings
        .iter()
        .find(|f| f.test_id == "api-get--api-plans")
        .unwrap();
    assert_eq!(api.kind, TargetKind::Api);
    assert!(approx(api.score, 83.33));
    assert_eq!(api.classification, Classification::FullyOperational);
    assert_eq!(api.fix_status, FixStatus::Fixed);
    assert!(api.recommendation.is_none());

    let page = report
        .findings
        .iter()
        .find(|f| f.test_id == "page--pricing")
        .unwrap();
    assert_eq!(page.score, 50.0);
    assert_eq!(page.classification, Classification::PartiallyOperational);

    let findings = engine.store().get_findings_by_run(&run.id).unwrap();
    let api_results = &findings
        .iter()
        .find(|f| f.classification == Classification::FullyOperational)
        .unwrap()
        .test_results;
    assert!(api_results.ui_presence.passed);
    assert!(api_results.functional_action.passed);
    assert!(api_results.backend_binding.passed);
    assert!(api_results.business_logic.passed);
    assert!(!api_results.data_integrity.passed);
    assert!(api_results.error_handling.passed);
}

#[tokio::test]
async fn test_rediscovery_accumulates_history_on_same_targets() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir, pricing_registry()).await;

    let first = engine.start_full_audit("tester", None).await.unwrap();
    let second = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(second.run_number, 2);
    assert_eq!(second.previous_run_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(second.change_from_previous, Some(0.0));

    let targets = engine.all_targets().unwrap();
    assert_eq!(targets.len(), 2);
    for target in &targets {
        assert_eq!(target.test_history.len(), 2);
        assert_eq!(target.test_history.latest().unwrap().run_id, second.id);
    }

    assert_eq!(engine.store().get_findings_by_run(&first.id).unwrap().len(), 2);
    assert_eq!(engine.store().get_findings_by_run(&second.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_yields_bind_recommendation() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![],
        vec![ApiEntry::new("GET", "/api/broken", "Broken", "معطل")],
    );
    let engine = engine_for(&dir, registry).await;

    let run = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(run.failed_targets, 1);
    assert_eq!(run.readiness_score, 0.0);

    let report = engine.generate_report(&run.id).unwrap();
    let finding = &report.findings[0];
    assert_eq!(finding.classification, Classification::NonOperational);
    assert!(approx(finding.score, 16.67));
    assert_eq!(finding.recommendation_type, Some(RecommendationType::Bind));
    assert_eq!(finding.priority, Priority::Critical);
    assert_eq!(finding.fix_status, FixStatus::Pending);
    let reason = finding.failure_reason.as_ref().unwrap();
    assert!(reason.en.contains("Broken"));
    assert!(reason.ar.contains("معطل"));
}

#[tokio::test]
async fn test_auth_protected_and_dynamic_endpoints_pass() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![PageEntry::new("/admin/users", "Users", "المستخدمون")
            .with_endpoints(&["/api/admin/users", "/api/admin/users/:id"])
            .with_role("admin")],
        vec![],
    );
    let engine = engine_for(&dir, registry).await;

    let run = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(run.total_targets, 3);
    assert_eq!(run.breakdown.services.total, 2);
    assert_eq!(run.breakdown.services.passed, 2);

    let targets = engine.all_targets().unwrap();
    let services: Vec<_> = targets
        .iter()
        .filter(|t| t.kind == TargetKind::Service)
        .collect();
    assert_eq!(services.len(), 2);
    for service in services {
        assert_eq!(service.parent_test_id.as_deref(), Some("page--admin-users"));
        assert_eq!(service.required_role.as_deref(), Some("admin"));
    }
}

#[tokio::test]
async fn test_page_audit_is_scoped_to_one_page() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![
            PageEntry::new("/pricing", "Pricing", "الأسعار").with_endpoints(&["/api/plans"]),
            PageEntry::new("/projects", "Projects", "المشاريع")
                .with_endpoints(&["/api/projects"]),
        ],
        vec![ApiEntry::new("GET", "/api/plans", "Plans", "الخطط")],
    );
    let engine = engine_for(&dir, registry).await;

    let run = engine
        .start_page_audit("tester", "/projects", None)
        .await
        .unwrap();
    assert_eq!(run.run_type, RunType::Page);
    assert_eq!(run.scope.as_deref(), Some("/projects"));
    assert_eq!(run.total_targets, 2);
    assert_eq!(run.breakdown.pages.total, 1);
    assert_eq!(run.breakdown.services.total, 1);
    assert_eq!(run.breakdown.apis.total, 0);
}

#[tokio::test]
async fn test_unknown_page_fails_before_any_run() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir, pricing_registry()).await;

    let err = engine
        .start_page_audit("tester", "/missing", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::PageNotFound(ref p) if p == "/missing"));
    assert!(engine.list_runs(10).unwrap().is_empty());
    assert!(engine.all_targets().unwrap().is_empty());
}

#[tokio::test]
async fn test_timed_out_probe_fails_without_aborting_run() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![],
        vec![
            ApiEntry::new("GET", "/api/slow", "Slow", "بطيء"),
            ApiEntry::new("GET", "/api/plans", "Plans", "الخطط"),
        ],
    );
    let engine = engine_for(&dir, registry).await;

    let run = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.passed_targets, 1);
    assert_eq!(run.failed_targets, 1);

    let findings = engine.store().get_findings_by_run(&run.id).unwrap();
    let timed_out = findings
        .iter()
        .find(|f| f.classification == Classification::NonOperational)
        .unwrap();
    assert!(timed_out
        .test_results
        .backend_binding
        .detail
        .contains("did not respond"));
}

#[tokio::test]
async fn test_compare_runs_tracks_regressions() {
    let dir = TempDir::new().unwrap();
    let broken = Arc::new(AtomicBool::new(false));
    let registry = Registry::new(
        vec![],
        vec![
            ApiEntry::new("GET", "/api/plans", "Plans", "الخطط"),
            ApiEntry::new("GET", "/api/flaky", "Flaky", "متقلب"),
        ],
    );
    let engine = engine_with_platform(&dir, registry, broken.clone()).await;

    let before = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(before.readiness_score, 100.0);

    broken.store(true, Ordering::SeqCst);
    let after = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(after.readiness_score, 50.0);
    assert_eq!(after.change_from_previous, Some(-50.0));

    let diff = engine.compare_runs(&before.id, &after.id).unwrap();
    assert_eq!(diff.run1.id, before.id);
    assert_eq!(diff.run2.id, after.id);
    assert_eq!(diff.score_change, -50.0);
    assert_eq!(diff.new_issues, vec!["api-get--api-flaky".to_string()]);
    assert!(diff.resolved_issues.is_empty());

    let reverse = engine.compare_runs(&after.id, &before.id).unwrap();
    assert!(reverse.new_issues.is_empty());
    assert_eq!(reverse.resolved_issues, vec!["api-get--api-flaky".to_string()]);

    let trend = engine.trend(10).unwrap();
    let numbers: Vec<i64> = trend.iter().map(|p| p.run_number).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_compare_with_unknown_run_is_not_found() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir, pricing_registry()).await;
    let run = engine.start_full_audit("tester", None).await.unwrap();

    let err = engine.compare_runs(&run.id, "missing").unwrap_err();
    assert!(matches!(err, AuditError::RunNotFound(_)));
    assert!(matches!(
        engine.generate_report("missing"),
        Err(AuditError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_cancels_in_flight_probe_and_fails_run() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![PageEntry::new("/pricing", "Pricing", "الأسعار")],
        vec![ApiEntry::new("GET", "/api/slow", "Slow", "بطيء")],
    );
    let base_url = spawn_platform(Arc::new(AtomicBool::new(false))).await;
    let store = Arc::new(AuditDb::new(dir.path()).unwrap());
    // Long enough that only the stop signal can end the slow probe early.
    let prober =
        ProbeRunner::new(&base_url, Duration::from_secs(30), UnreachablePolicy::Fail).unwrap();
    let engine = AuditEngine::new(store, Arc::new(registry), prober);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = stop_tx.send(true);
    });

    let started = Instant::now();
    let err = engine
        .start_full_audit("tester", Some(stop_rx))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.is_cancelled());

    let AuditError::RunFailed { run_id, .. } = err else {
        panic!("expected RunFailed");
    };
    let stored = engine.get_run(&run_id).unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("audit run cancelled"));
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_requests_send_json_and_never_mutating_methods() {
    let dir = TempDir::new().unwrap();
    let seen: SeenRequests = Arc::new(Mutex::new(Vec::new()));
    let base_url = spawn_recording_platform(seen.clone()).await;
    let registry = Registry::new(
        vec![],
        vec![
            ApiEntry::new("GET", "/api/plans", "Plans", "الخطط"),
            ApiEntry::new("POST", "/api/auth/login", "Login", "تسجيل الدخول"),
        ],
    );
    let store = Arc::new(AuditDb::new(dir.path()).unwrap());
    let prober =
        ProbeRunner::new(&base_url, Duration::from_secs(1), UnreachablePolicy::Fail).unwrap();
    let engine = AuditEngine::new(store, Arc::new(registry), prober);

    let run = engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(run.passed_targets, 2);

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(seen.len(), 2);

    let (login_method, login_path, login_type) = &seen[0];
    assert_eq!(login_path, "/api/auth/login");
    assert_eq!(*login_method, Method::OPTIONS);
    assert_eq!(login_type.as_deref(), Some("application/json"));

    let (plans_method, plans_path, plans_type) = &seen[1];
    assert_eq!(plans_path, "/api/plans");
    assert_eq!(*plans_method, Method::GET);
    assert_eq!(plans_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_run_closed_by_another_process_is_not_reported_completed() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![],
        vec![ApiEntry::new("GET", "/api/slow", "Slow", "بطيء")],
    );
    let engine = engine_for(&dir, registry).await;

    // A second process opening the same data dir closes runs it sees as running.
    let data_dir = dir.path().to_path_buf();
    let reopen = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        AuditDb::new(&data_dir).unwrap();
    });

    let err = engine.start_full_audit("tester", None).await.unwrap_err();
    reopen.await.unwrap();

    let AuditError::RunFailed { run_id, cause } = err else {
        panic!("expected RunFailed");
    };
    assert!(matches!(*cause, AuditError::RunAlreadyFinished(_)));

    let stored = engine.get_run(&run_id).unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("interrupted"));
}

#[tokio::test]
async fn test_shared_service_keeps_first_page_across_page_runs() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(
        vec![
            PageEntry::new("/pricing", "Pricing", "الأسعار").with_endpoints(&["/api/plans"]),
            PageEntry::new("/billing", "Billing", "الفواتير").with_endpoints(&["/api/plans"]),
        ],
        vec![],
    );
    let engine = engine_for(&dir, registry).await;

    let shared_parent = |engine: &AuditEngine| {
        engine
            .all_targets()
            .unwrap()
            .into_iter()
            .find(|t| t.kind == TargetKind::Service)
            .unwrap()
            .parent_test_id
    };

    engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(shared_parent(&engine).as_deref(), Some("page--pricing"));

    engine
        .start_page_audit("tester", "/billing", None)
        .await
        .unwrap();
    assert_eq!(shared_parent(&engine).as_deref(), Some("page--pricing"));

    engine.start_full_audit("tester", None).await.unwrap();
    assert_eq!(shared_parent(&engine).as_deref(), Some("page--pricing"));
    assert_eq!(
        engine
            .all_targets()
            .unwrap()
            .iter()
            .filter(|t| t.kind == TargetKind::Service)
            .count(),
        1
    );
}
