pub mod aggregate;
pub mod classifier;
pub mod db;
pub mod discovery;
pub mod engine;
pub mod probe;
pub mod recommendation;
pub mod report;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::TEST_HISTORY_CAPACITY;
use crate::error::AuditError;

// ============================================================================
// Enumerations
// ============================================================================

/// Kind of addressable surface a target represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Page,
    Service,
    Button,
    Icon,
    Form,
    Table,
    Card,
    Widget,
    Toggle,
    Modal,
    Api,
    Cell,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Service => "service",
            Self::Button => "button",
            Self::Icon => "icon",
            Self::Form => "form",
            Self::Table => "table",
            Self::Card => "card",
            Self::Widget => "widget",
            Self::Toggle => "toggle",
            Self::Modal => "modal",
            Self::Api => "api",
            Self::Cell => "cell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "page" => Self::Page,
            "service" => Self::Service,
            "button" => Self::Button,
            "icon" => Self::Icon,
            "form" => Self::Form,
            "table" => Self::Table,
            "card" => Self::Card,
            "widget" => Self::Widget,
            "toggle" => Self::Toggle,
            "modal" => Self::Modal,
            "api" => Self::Api,
            "cell" => Self::Cell,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    FullyOperational,
    PartiallyOperational,
    NonOperational,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyOperational => "FULLY_OPERATIONAL",
            Self::PartiallyOperational => "PARTIALLY_OPERATIONAL",
            Self::NonOperational => "NON_OPERATIONAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FULLY_OPERATIONAL" => Some(Self::FullyOperational),
            "PARTIALLY_OPERATIONAL" => Some(Self::PartiallyOperational),
            "NON_OPERATIONAL" => Some(Self::NonOperational),
            _ => None,
        }
    }

    /// Anything short of fully operational counts as an open issue.
    pub fn is_issue(&self) -> bool {
        !matches!(self, Self::FullyOperational)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Bind,
    Fix,
    Improve,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Fix => "fix",
            Self::Improve => "improve",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(Self::Bind),
            "fix" => Some(Self::Fix),
            "improve" => Some(Self::Improve),
            _ => None,
        }
    }
}

/// Remediation priority. Ordered so that `Critical` sorts highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Fixed,
    Pending,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Full,
    Page,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Page => "page",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "page" => Some(Self::Page),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ============================================================================
// Check results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub en: String,
    pub ar: String,
}

impl LocalizedText {
    pub fn new(en: impl Into<String>, ar: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            ar: ar.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }

    pub fn unverified() -> Self {
        Self::fail("Not verified")
    }
}

/// The six checks of the test battery, in battery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckName {
    UiPresence,
    FunctionalAction,
    BackendBinding,
    BusinessLogic,
    DataIntegrity,
    ErrorHandling,
}

impl CheckName {
    pub const ALL: [CheckName; 6] = [
        CheckName::UiPresence,
        CheckName::FunctionalAction,
        CheckName::BackendBinding,
        CheckName::BusinessLogic,
        CheckName::DataIntegrity,
        CheckName::ErrorHandling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UiPresence => "uiPresence",
            Self::FunctionalAction => "functionalAction",
            Self::BackendBinding => "backendBinding",
            Self::BusinessLogic => "businessLogic",
            Self::DataIntegrity => "dataIntegrity",
            Self::ErrorHandling => "errorHandling",
        }
    }

    pub fn label_ar(&self) -> &'static str {
        match self {
            Self::UiPresence => "وجود الواجهة",
            Self::FunctionalAction => "الإجراء الوظيفي",
            Self::BackendBinding => "الربط بالخادم",
            Self::BusinessLogic => "منطق الأعمال",
            Self::DataIntegrity => "سلامة البيانات",
            Self::ErrorHandling => "معالجة الأخطاء",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementTestResults {
    pub ui_presence: CheckResult,
    pub functional_action: CheckResult,
    pub backend_binding: CheckResult,
    pub business_logic: CheckResult,
    pub data_integrity: CheckResult,
    pub error_handling: CheckResult,
}

impl ElementTestResults {
    /// Every check failed and unverified.
    pub fn all_unverified() -> Self {
        Self {
            ui_presence: CheckResult::unverified(),
            functional_action: CheckResult::unverified(),
            backend_binding: CheckResult::unverified(),
            business_logic: CheckResult::unverified(),
            data_integrity: CheckResult::unverified(),
            error_handling: CheckResult::unverified(),
        }
    }

    pub fn get(&self, name: CheckName) -> &CheckResult {
        match name {
            CheckName::UiPresence => &self.ui_presence,
            CheckName::FunctionalAction => &self.functional_action,
            CheckName::BackendBinding => &self.backend_binding,
            CheckName::BusinessLogic => &self.business_logic,
            CheckName::DataIntegrity => &self.data_integrity,
            CheckName::ErrorHandling => &self.error_handling,
        }
    }

    pub fn passed(&self, name: CheckName) -> bool {
        self.get(name).passed
    }

    pub fn passed_count(&self) -> usize {
        CheckName::ALL.iter().filter(|c| self.passed(**c)).count()
    }

    pub fn failed_checks(&self) -> Vec<CheckName> {
        CheckName::ALL
            .iter()
            .copied()
            .filter(|c| !self.passed(*c))
            .collect()
    }
}

// ============================================================================
// Targets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestHistoryEntry {
    pub run_id: String,
    pub classification: Classification,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Most-recent-first history of a target's results, capped at
/// `TEST_HISTORY_CAPACITY` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestHistory(VecDeque<TestHistoryEntry>);

impl TestHistory {
    pub const CAPACITY: usize = TEST_HISTORY_CAPACITY;

    pub fn new() -> Self {
        Self(VecDeque::with_capacity(Self::CAPACITY))
    }

    pub fn record(&mut self, entry: TestHistoryEntry) {
        self.0.push_front(entry);
        self.0.truncate(Self::CAPACITY);
    }

    pub fn latest(&self) -> Option<&TestHistoryEntry> {
        self.0.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestHistoryEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Row id; 0 until the target has been persisted.
    pub id: i64,
    pub test_id: String,
    pub name: String,
    pub name_ar: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub path: String,
    pub selector: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_method: Option<String>,
    pub parent_test_id: Option<String>,
    pub required_role: Option<String>,
    pub current_classification: Option<Classification>,
    pub current_score: Option<f64>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub test_history: TestHistory,
    pub is_active: bool,
}

impl Target {
    /// A freshly discovered, not yet persisted target.
    pub fn discovered(test_id: String, kind: TargetKind, name: &str, name_ar: &str, path: &str) -> Self {
        Self {
            id: 0,
            test_id,
            name: name.to_string(),
            name_ar: name_ar.to_string(),
            kind,
            path: path.to_string(),
            selector: None,
            api_endpoint: None,
            api_method: None,
            parent_test_id: None,
            required_role: None,
            current_classification: None,
            current_score: None,
            last_tested_at: None,
            test_history: TestHistory::new(),
            is_active: true,
        }
    }

    /// Fold one run's outcome into the target's cross-run state.
    pub fn record_result(
        &mut self,
        run_id: &str,
        classification: Classification,
        score: f64,
        tested_at: DateTime<Utc>,
    ) {
        self.current_classification = Some(classification);
        self.current_score = Some(score);
        self.last_tested_at = Some(tested_at);
        self.is_active = true;
        self.test_history.record(TestHistoryEntry {
            run_id: run_id.to_string(),
            classification,
            score,
            timestamp: tested_at,
        });
    }

    /// Take the descriptive fields of a fresh discovery, keeping row id and history.
    ///
    /// A shared service keeps the page that first claimed it: when another
    /// page rediscovers it, the owner-derived fields stay as they are.
    pub fn refresh_from(&mut self, discovered: &Target) {
        self.kind = discovered.kind;
        self.selector = discovered.selector.clone();
        self.api_endpoint = discovered.api_endpoint.clone();
        self.api_method = discovered.api_method.clone();

        if self.parent_test_id.is_some() && self.parent_test_id != discovered.parent_test_id {
            return;
        }
        self.name = discovered.name.clone();
        self.name_ar = discovered.name_ar.clone();
        self.path = discovered.path.clone();
        self.parent_test_id = discovered.parent_test_id.clone();
        self.required_role = discovered.required_role.clone();
    }
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub total: i64,
    pub passed: i64,
    pub partial: i64,
    pub failed: i64,
}

impl CategoryCounts {
    pub fn record(&mut self, classification: Classification) {
        self.total += 1;
        match classification {
            Classification::FullyOperational => self.passed += 1,
            Classification::PartiallyOperational => self.partial += 1,
            Classification::NonOperational => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub pages: CategoryCounts,
    pub services: CategoryCounts,
    pub apis: CategoryCounts,
    pub buttons: CategoryCounts,
    pub icons: CategoryCounts,
    pub forms: CategoryCounts,
}

impl Breakdown {
    /// Category a target kind is tallied under. Kinds outside the six
    /// reported categories are not tallied.
    pub fn category_mut(&mut self, kind: TargetKind) -> Option<&mut CategoryCounts> {
        match kind {
            TargetKind::Page => Some(&mut self.pages),
            TargetKind::Service => Some(&mut self.services),
            TargetKind::Api => Some(&mut self.apis),
            TargetKind::Button => Some(&mut self.buttons),
            TargetKind::Icon => Some(&mut self.icons),
            TargetKind::Form => Some(&mut self.forms),
            TargetKind::Table
            | TargetKind::Card
            | TargetKind::Widget
            | TargetKind::Toggle
            | TargetKind::Modal
            | TargetKind::Cell => None,
        }
    }

    pub fn record(&mut self, kind: TargetKind, classification: Classification) {
        if let Some(counts) = self.category_mut(kind) {
            counts.record(classification);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRun {
    pub id: String,
    pub run_number: i64,
    pub run_type: RunType,
    pub scope: Option<String>,
    pub status: RunStatus,
    pub initiated_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub total_targets: i64,
    pub tested_targets: i64,
    pub passed_targets: i64,
    pub failed_targets: i64,
    pub partial_targets: i64,
    pub readiness_score: f64,
    pub breakdown: Breakdown,
    pub change_from_previous: Option<f64>,
    pub previous_run_id: Option<String>,
    pub error_message: Option<String>,
}

impl AuditRun {
    /// A new run in the `running` state, numbered after `previous`.
    pub fn start(
        run_type: RunType,
        scope: Option<String>,
        initiated_by: &str,
        total_targets: i64,
        previous: Option<&AuditRun>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_number: previous.map(|p| p.run_number + 1).unwrap_or(1),
            run_type,
            scope,
            status: RunStatus::Running,
            initiated_by: initiated_by.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            total_targets,
            tested_targets: 0,
            passed_targets: 0,
            failed_targets: 0,
            partial_targets: 0,
            readiness_score: 0.0,
            breakdown: Breakdown::default(),
            change_from_previous: None,
            previous_run_id: previous.map(|p| p.id.clone()),
            error_message: None,
        }
    }

    fn ensure_running(&self) -> Result<(), AuditError> {
        if self.status.is_terminal() {
            return Err(AuditError::RunAlreadyFinished(self.id.clone()));
        }
        Ok(())
    }

    /// Transition `running -> completed`, setting every count field from one
    /// aggregation pass.
    pub fn complete(
        &mut self,
        totals: aggregate::RunTotals,
        previous_score: Option<f64>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), AuditError> {
        self.ensure_running()?;
        self.status = RunStatus::Completed;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some((completed_at - self.started_at).num_milliseconds().max(0));
        self.tested_targets = totals.tested_targets;
        self.passed_targets = totals.passed_targets;
        self.failed_targets = totals.failed_targets;
        self.partial_targets = totals.partial_targets;
        self.readiness_score = totals.readiness_score;
        self.breakdown = totals.breakdown;
        self.change_from_previous =
            previous_score.map(|prev| aggregate::round2(totals.readiness_score - prev));
        Ok(())
    }

    /// Transition `running -> failed`, recording the error.
    pub fn fail(&mut self, message: impl Into<String>, failed_at: DateTime<Utc>) -> Result<(), AuditError> {
        self.ensure_running()?;
        self.status = RunStatus::Failed;
        self.completed_at = Some(failed_at);
        self.duration_ms = Some((failed_at - self.started_at).num_milliseconds().max(0));
        self.error_message = Some(message.into());
        Ok(())
    }
}

// ============================================================================
// Findings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    /// Row id; 0 until persisted.
    pub id: i64,
    pub run_id: String,
    pub target_id: i64,
    pub classification: Classification,
    pub score: f64,
    pub test_results: ElementTestResults,
    pub failure_reason: Option<LocalizedText>,
    pub recommendation: Option<LocalizedText>,
    pub recommendation_type: Option<RecommendationType>,
    pub priority: Priority,
    pub fix_status: FixStatus,
    pub created_at: DateTime<Utc>,
}
