use super::{Classification, ElementTestResults};
use crate::config::{FULLY_OPERATIONAL_MIN_SCORE, PARTIALLY_OPERATIONAL_MIN_SCORE};

const CHECK_COUNT: f64 = 6.0;

/// Share of passing checks, as a 0-100 score.
pub fn score(results: &ElementTestResults) -> f64 {
    (results.passed_count() as f64 / CHECK_COUNT) * 100.0
}

/// Bucket a score. Each band includes its lower edge.
pub fn classify(score: f64) -> Classification {
    if score >= FULLY_OPERATIONAL_MIN_SCORE {
        Classification::FullyOperational
    } else if score >= PARTIALLY_OPERATIONAL_MIN_SCORE {
        Classification::PartiallyOperational
    } else {
        Classification::NonOperational
    }
}

pub fn evaluate(results: &ElementTestResults) -> (f64, Classification) {
    let score = score(results);
    (score, classify(score))
}
