//! Bilingual remediation advice for a tested target.
//!
//! Exactly one recommendation is attached per finding. When several checks
//! fail, the first matching rule below wins:
//!
//! | Failed check                      | Type      | Priority   |
//! |-----------------------------------|-----------|------------|
//! | backendBinding                    | `bind`    | `critical` |
//! | functionalAction                  | `fix`     | `high`     |
//! | businessLogic or dataIntegrity    | `improve` | `medium`   |
//! | anything else                     | `improve` | `low`      |

use serde::{Deserialize, Serialize};

use super::{
    CheckName, Classification, ElementTestResults, FixStatus, LocalizedText, Priority,
    RecommendationType, Target,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub failure_reason: Option<LocalizedText>,
    pub recommendation: Option<LocalizedText>,
    pub recommendation_type: Option<RecommendationType>,
    pub priority: Priority,
    pub fix_status: FixStatus,
}

impl Recommendation {
    fn none() -> Self {
        Self {
            failure_reason: None,
            recommendation: None,
            recommendation_type: None,
            priority: Priority::Low,
            fix_status: FixStatus::Fixed,
        }
    }
}

pub fn recommend(
    target: &Target,
    results: &ElementTestResults,
    classification: Classification,
) -> Recommendation {
    if classification == Classification::FullyOperational {
        return Recommendation::none();
    }

    let failed = results.failed_checks();
    let (recommendation, recommendation_type, priority) = select(results);

    Recommendation {
        failure_reason: Some(failure_reason(target, &failed)),
        recommendation: Some(recommendation),
        recommendation_type: Some(recommendation_type),
        priority,
        fix_status: FixStatus::Pending,
    }
}

fn select(results: &ElementTestResults) -> (LocalizedText, RecommendationType, Priority) {
    if !results.passed(CheckName::BackendBinding) {
        (
            LocalizedText::new(
                "Connect this element to a real backend service",
                "ربط هذا العنصر بخدمة خلفية حقيقية",
            ),
            RecommendationType::Bind,
            Priority::Critical,
        )
    } else if !results.passed(CheckName::FunctionalAction) {
        (
            LocalizedText::new(
                "Implement the functional logic behind this element",
                "تنفيذ المنطق الوظيفي لهذا العنصر",
            ),
            RecommendationType::Fix,
            Priority::High,
        )
    } else if !results.passed(CheckName::BusinessLogic) || !results.passed(CheckName::DataIntegrity)
    {
        (
            LocalizedText::new(
                "Improve business logic and data handling",
                "تحسين منطق الأعمال ومعالجة البيانات",
            ),
            RecommendationType::Improve,
            Priority::Medium,
        )
    } else {
        (
            LocalizedText::new("Review and enhance this element", "مراجعة هذا العنصر وتحسينه"),
            RecommendationType::Improve,
            Priority::Low,
        )
    }
}

fn failure_reason(target: &Target, failed: &[CheckName]) -> LocalizedText {
    let names_en: Vec<&str> = failed.iter().map(|c| c.as_str()).collect();
    let names_ar: Vec<&str> = failed.iter().map(|c| c.label_ar()).collect();
    LocalizedText::new(
        format!(
            "{} failed {} of 6 checks: {}",
            target.name,
            failed.len(),
            names_en.join(", ")
        ),
        format!(
            "{} أخفق في {} من 6 فحوصات: {}",
            target.name_ar,
            failed.len(),
            names_ar.join("، ")
        ),
    )
}
