//! Folds a run's findings into run-level totals.
//!
//! Only ever called once per run, after every target of the run has been
//! probed and recorded.

use serde::{Deserialize, Serialize};

use super::{Breakdown, Classification, TargetKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub total_targets: i64,
    pub tested_targets: i64,
    pub passed_targets: i64,
    pub failed_targets: i64,
    pub partial_targets: i64,
    pub readiness_score: f64,
    pub breakdown: Breakdown,
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Weighted readiness: partially operational targets earn half credit.
pub fn readiness_score(passed: i64, partial: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(((passed as f64 + partial as f64 * 0.5) / total as f64) * 100.0)
}

/// Aggregate `(kind, classification)` pairs of one run's findings.
pub fn aggregate(total_targets: i64, findings: &[(TargetKind, Classification)]) -> RunTotals {
    let mut passed = 0;
    let mut partial = 0;
    let mut failed = 0;
    let mut breakdown = Breakdown::default();

    for (kind, classification) in findings {
        match classification {
            Classification::FullyOperational => passed += 1,
            Classification::PartiallyOperational => partial += 1,
            Classification::NonOperational => failed += 1,
        }
        breakdown.record(*kind, *classification);
    }

    RunTotals {
        total_targets,
        tested_targets: findings.len() as i64,
        passed_targets: passed,
        failed_targets: failed,
        partial_targets: partial,
        readiness_score: readiness_score(passed, partial, total_targets),
        breakdown,
    }
}
