use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::aggregate;
use super::classifier;
use super::discovery;
use super::probe::ProbeRunner;
use super::recommendation;
use super::report::{self, AuditReportSummary, RunComparison, TrendPoint};
use super::store::AuditStore;
use super::{
    AuditFinding, AuditRun, Classification, ElementTestResults, RunStatus, RunType, Target,
};
use crate::activity::{ActivityLevel, ActivityLog, ActivitySource};
use crate::config::DEFAULT_MAX_CONCURRENT_PROBES;
use crate::error::AuditError;
use crate::registry::Registry;
use crate::state::AuditCoordinator;

const CANCELLED_MESSAGE: &str = "audit run cancelled";

/// Drives discovery, probing, recording, and aggregation for one run at a time.
///
/// The engine keeps no "current run" of its own. Progress and the stop signal
/// live in an optional [`AuditCoordinator`]; a caller that wants at most one
/// active run claims the coordinator slot before calling in.
pub struct AuditEngine {
    store: Arc<dyn AuditStore>,
    registry: Arc<Registry>,
    prober: ProbeRunner,
    activity: Arc<ActivityLog>,
    coordinator: Option<Arc<AuditCoordinator>>,
    max_concurrent_probes: usize,
}

impl AuditEngine {
    pub fn new(store: Arc<dyn AuditStore>, registry: Arc<Registry>, prober: ProbeRunner) -> Self {
        Self {
            store,
            registry,
            prober,
            activity: Arc::new(ActivityLog::new()),
            coordinator: None,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }

    pub fn with_activity(mut self, activity: Arc<ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<AuditCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = max.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Audit every registered page, service dependency, and API.
    pub async fn start_full_audit(
        &self,
        initiated_by: &str,
        stop_rx: Option<watch::Receiver<bool>>,
    ) -> Result<AuditRun, AuditError> {
        let targets = discovery::discover_all(&self.registry);
        self.execute(RunType::Full, None, initiated_by, targets, stop_rx)
            .await
    }

    /// Audit one registered page and its service dependencies. Unknown pages
    /// fail before any run is created.
    pub async fn start_page_audit(
        &self,
        initiated_by: &str,
        page_path: &str,
        stop_rx: Option<watch::Receiver<bool>>,
    ) -> Result<AuditRun, AuditError> {
        let targets = discovery::discover_page(&self.registry, page_path)?;
        self.execute(
            RunType::Page,
            Some(page_path.to_string()),
            initiated_by,
            targets,
            stop_rx,
        )
        .await
    }

    pub fn generate_report(&self, run_id: &str) -> Result<AuditReportSummary, AuditError> {
        report::generate_report(self.store.as_ref(), run_id)
    }

    pub fn compare_runs(
        &self,
        baseline_run_id: &str,
        current_run_id: &str,
    ) -> Result<RunComparison, AuditError> {
        report::compare_runs(self.store.as_ref(), baseline_run_id, current_run_id)
    }

    pub fn list_runs(&self, limit: i64) -> Result<Vec<AuditRun>, AuditError> {
        Ok(self.store.list_runs(limit)?)
    }

    pub fn get_run(&self, run_id: &str) -> Result<AuditRun, AuditError> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| AuditError::RunNotFound(run_id.to_string()))
    }

    pub fn all_targets(&self) -> Result<Vec<Target>, AuditError> {
        Ok(self.store.get_all_targets()?)
    }

    pub fn trend(&self, limit: i64) -> Result<Vec<TrendPoint>, AuditError> {
        report::trend(self.store.as_ref(), limit)
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    async fn execute(
        &self,
        run_type: RunType,
        scope: Option<String>,
        initiated_by: &str,
        targets: Vec<Target>,
        stop_rx: Option<watch::Receiver<bool>>,
    ) -> Result<AuditRun, AuditError> {
        let previous = self.store.get_latest_run()?;
        let mut run = AuditRun::start(
            run_type,
            scope,
            initiated_by,
            targets.len() as i64,
            previous.as_ref(),
        );
        self.store.create_run(&run)?;

        if let Some(coordinator) = &self.coordinator {
            coordinator.attach_run(&run.id, targets.len()).await;
        }
        info!(
            "Audit run #{} started: run_id={}, type={}, targets={}",
            run.run_number,
            run.id,
            run.run_type.as_str(),
            targets.len()
        );
        self.activity
            .emit(
                ActivitySource::Engine,
                ActivityLevel::Info,
                Some(run.id.as_str()),
                format!(
                    "Audit run #{} started by {} ({} targets)",
                    run.run_number,
                    initiated_by,
                    targets.len()
                ),
            )
            .await;

        let outcome = match self.probe_all(&run, &targets, stop_rx).await {
            Ok(()) => self.finalize(&mut run, previous.as_ref()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(
                    "Audit run #{} completed: readiness={:.2}, passed={}, partial={}, failed={}",
                    run.run_number,
                    run.readiness_score,
                    run.passed_targets,
                    run.partial_targets,
                    run.failed_targets
                );
                self.activity
                    .emit(
                        ActivitySource::Engine,
                        ActivityLevel::Info,
                        Some(run.id.as_str()),
                        format!(
                            "Audit run #{} completed with readiness {:.2}",
                            run.run_number, run.readiness_score
                        ),
                    )
                    .await;
                Ok(run)
            }
            Err(cause) => Err(self.fail_run(&mut run, cause).await),
        }
    }

    /// Probe every target with bounded fan-out and record each result as its
    /// probe completes.
    async fn probe_all(
        &self,
        run: &AuditRun,
        targets: &[Target],
        mut stop_rx: Option<watch::Receiver<bool>>,
    ) -> Result<(), AuditError> {
        let mut probes = stream::iter(targets.to_vec())
            .map(|target| async move {
                let results = self.prober.run(&target).await;
                (target, results)
            })
            .buffer_unordered(self.max_concurrent_probes);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop_rx) => return Err(AuditError::Cancelled),
                next = probes.next() => match next {
                    Some((target, results)) => self.record_target(run, &target, results).await?,
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Upsert the target and append its finding for this run.
    async fn record_target(
        &self,
        run: &AuditRun,
        discovered: &Target,
        results: ElementTestResults,
    ) -> Result<(), AuditError> {
        let (score, classification) = classifier::evaluate(&results);
        let advice = recommendation::recommend(discovered, &results, classification);
        let tested_at = Utc::now();

        let target_id = match self.store.get_target_by_test_id(&discovered.test_id)? {
            Some(mut existing) => {
                existing.refresh_from(discovered);
                existing.record_result(&run.id, classification, score, tested_at);
                self.store.update_target(&existing)?;
                existing.id
            }
            None => {
                let mut fresh = discovered.clone();
                fresh.record_result(&run.id, classification, score, tested_at);
                self.store.create_target(&fresh)?
            }
        };

        let finding = AuditFinding {
            id: 0,
            run_id: run.id.clone(),
            target_id,
            classification,
            score,
            test_results: results,
            failure_reason: advice.failure_reason,
            recommendation: advice.recommendation,
            recommendation_type: advice.recommendation_type,
            priority: advice.priority,
            fix_status: advice.fix_status,
            created_at: tested_at,
        };
        self.store.create_finding(&finding)?;

        debug!(
            "Recorded {} ({}): score={:.2}, {}",
            discovered.test_id,
            discovered.kind.as_str(),
            score,
            classification.as_str()
        );
        if classification == Classification::NonOperational {
            self.activity
                .emit(
                    ActivitySource::Probe,
                    ActivityLevel::Warn,
                    Some(run.id.as_str()),
                    format!("{} is non-operational ({:.2})", discovered.test_id, score),
                )
                .await;
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.target_done().await;
        }
        Ok(())
    }

    /// One aggregation pass over the run's stored findings, then `running -> completed`.
    fn finalize(&self, run: &mut AuditRun, previous: Option<&AuditRun>) -> Result<(), AuditError> {
        let kinds: HashMap<i64, _> = self
            .store
            .get_all_targets()?
            .into_iter()
            .map(|t| (t.id, t.kind))
            .collect();

        let tallied: Vec<_> = self
            .store
            .get_findings_by_run(&run.id)?
            .into_iter()
            .filter_map(|f| kinds.get(&f.target_id).map(|kind| (*kind, f.classification)))
            .collect();

        let totals = aggregate::aggregate(run.total_targets, &tallied);
        let previous_score = previous
            .filter(|p| p.status == RunStatus::Completed)
            .map(|p| p.readiness_score);

        let mut completed = run.clone();
        completed.complete(totals, previous_score, Utc::now())?;
        // Another process may have already closed this row (interrupted-run recovery).
        self.store.update_run(&completed).map_err(store_error)?;
        *run = completed;
        Ok(())
    }

    /// Record the failure on the run row, then hand the cause back wrapped
    /// with the run id.
    async fn fail_run(&self, run: &mut AuditRun, cause: AuditError) -> AuditError {
        let message = if cause.is_cancelled() {
            CANCELLED_MESSAGE.to_string()
        } else {
            cause.to_string()
        };

        match run.fail(message.clone(), Utc::now()) {
            Ok(()) => {
                if let Err(e) = self.store.update_run(run) {
                    error!("Failed to store failure of audit run {}: {}", run.id, e);
                }
            }
            Err(e) => warn!("Audit run {} not marked failed: {}", run.id, e),
        }

        if cause.is_cancelled() {
            warn!("Audit run #{} cancelled", run.run_number);
        } else {
            error!("Audit run #{} failed: {}", run.run_number, message);
        }
        self.activity
            .emit(
                ActivitySource::Engine,
                ActivityLevel::Error,
                Some(run.id.as_str()),
                format!("Audit run #{} failed: {}", run.run_number, message),
            )
            .await;

        AuditError::RunFailed {
            run_id: run.id.clone(),
            cause: Box::new(cause),
        }
    }
}

/// Lift a typed audit error back out of the store's `anyhow` wrapper.
fn store_error(err: anyhow::Error) -> AuditError {
    match err.downcast::<AuditError>() {
        Ok(audit_err) => audit_err,
        Err(err) => AuditError::Store(err),
    }
}

/// Resolves once a stop has been requested. Never resolves without a
/// receiver or after the sender is gone.
async fn wait_for_stop(stop_rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = stop_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
