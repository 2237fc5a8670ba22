//! Denormalized run reports and run-to-run diffs.
//!
//! Reports join a run with its findings and the targets those findings point
//! at. Diffs compare the sets of test ids that are not fully operational in
//! each run; the first run is the baseline.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use super::aggregate::round2;
use super::store::AuditStore;
use super::{
    AuditFinding, AuditRun, Breakdown, Classification, FixStatus, LocalizedText, Priority,
    RecommendationType, RunStatus, Target, TargetKind,
};
use crate::error::AuditError;

/// One finding flattened together with the target it was recorded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingSummary {
    pub test_id: String,
    pub name: String,
    pub name_ar: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub path: String,
    pub required_role: Option<String>,
    pub classification: Classification,
    pub score: f64,
    pub failure_reason: Option<LocalizedText>,
    pub recommendation: Option<LocalizedText>,
    pub recommendation_type: Option<RecommendationType>,
    pub priority: Priority,
    pub fix_status: FixStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReportSummary {
    pub run: AuditRun,
    pub readiness_score: f64,
    pub breakdown: Breakdown,
    /// Highest priority first, then lowest score.
    pub findings: Vec<FindingSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunComparison {
    pub run1: AuditRun,
    pub run2: AuditRun,
    pub score_change: f64,
    pub new_issues: Vec<String>,
    pub resolved_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub run_id: String,
    pub run_number: i64,
    pub readiness_score: f64,
}

impl AuditReportSummary {
    /// Test ids of every finding that is not fully operational.
    pub fn issue_test_ids(&self) -> BTreeSet<String> {
        self.findings
            .iter()
            .filter(|f| f.classification.is_issue())
            .map(|f| f.test_id.clone())
            .collect()
    }
}

pub fn build_report(
    run: AuditRun,
    findings: Vec<AuditFinding>,
    targets_by_id: &HashMap<i64, Target>,
) -> AuditReportSummary {
    let mut summaries: Vec<FindingSummary> = findings
        .into_iter()
        .filter_map(|finding| {
            let Some(target) = targets_by_id.get(&finding.target_id) else {
                warn!(
                    "Finding {} of run {} references missing target {}",
                    finding.id, finding.run_id, finding.target_id
                );
                return None;
            };
            Some(FindingSummary {
                test_id: target.test_id.clone(),
                name: target.name.clone(),
                name_ar: target.name_ar.clone(),
                kind: target.kind,
                path: target.path.clone(),
                required_role: target.required_role.clone(),
                classification: finding.classification,
                score: finding.score,
                failure_reason: finding.failure_reason,
                recommendation: finding.recommendation,
                recommendation_type: finding.recommendation_type,
                priority: finding.priority,
                fix_status: finding.fix_status,
            })
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.score.total_cmp(&b.score))
            .then_with(|| a.test_id.cmp(&b.test_id))
    });

    AuditReportSummary {
        readiness_score: run.readiness_score,
        breakdown: run.breakdown,
        run,
        findings: summaries,
    }
}

/// Diff two reports. `baseline` is treated as the earlier run.
pub fn diff_reports(baseline: AuditReportSummary, current: AuditReportSummary) -> RunComparison {
    let before = baseline.issue_test_ids();
    let after = current.issue_test_ids();

    RunComparison {
        score_change: round2(current.readiness_score - baseline.readiness_score),
        new_issues: after.difference(&before).cloned().collect(),
        resolved_issues: before.difference(&after).cloned().collect(),
        run1: baseline.run,
        run2: current.run,
    }
}

pub fn generate_report(store: &dyn AuditStore, run_id: &str) -> Result<AuditReportSummary, AuditError> {
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| AuditError::RunNotFound(run_id.to_string()))?;
    let findings = store.get_findings_by_run(run_id)?;
    let targets_by_id: HashMap<i64, Target> = store
        .get_all_targets()?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    Ok(build_report(run, findings, &targets_by_id))
}

pub fn compare_runs(
    store: &dyn AuditStore,
    baseline_run_id: &str,
    current_run_id: &str,
) -> Result<RunComparison, AuditError> {
    let baseline = generate_report(store, baseline_run_id)?;
    let current = generate_report(store, current_run_id)?;
    Ok(diff_reports(baseline, current))
}

/// Readiness of completed runs among the newest `limit`, oldest first.
pub fn trend(store: &dyn AuditStore, limit: i64) -> Result<Vec<TrendPoint>, AuditError> {
    let mut points: Vec<TrendPoint> = store
        .list_runs(limit)?
        .into_iter()
        .filter(|run| run.status == RunStatus::Completed)
        .map(|run| TrendPoint {
            run_id: run.id,
            run_number: run.run_number,
            readiness_score: run.readiness_score,
        })
        .collect();
    points.reverse();
    Ok(points)
}
