use super::{AuditFinding, AuditRun, Target};

/// Persistence collaborator for runs, targets, and findings.
///
/// Every call is individually atomic; the engine never needs a transaction
/// spanning more than one entity. Findings are append-only and target writes
/// are keyed on `test_id`, so repeating a write is harmless.
pub trait AuditStore: Send + Sync {
    fn create_run(&self, run: &AuditRun) -> anyhow::Result<()>;
    /// Write a run's mutable fields. Runs already in a terminal state are left untouched.
    fn update_run(&self, run: &AuditRun) -> anyhow::Result<()>;
    fn get_run(&self, run_id: &str) -> anyhow::Result<Option<AuditRun>>;
    /// The run with the highest run number.
    fn get_latest_run(&self) -> anyhow::Result<Option<AuditRun>>;
    /// Newest first.
    fn list_runs(&self, limit: i64) -> anyhow::Result<Vec<AuditRun>>;

    /// Insert a target and return its row id.
    fn create_target(&self, target: &Target) -> anyhow::Result<i64>;
    fn update_target(&self, target: &Target) -> anyhow::Result<()>;
    fn get_target_by_test_id(&self, test_id: &str) -> anyhow::Result<Option<Target>>;
    fn get_all_targets(&self) -> anyhow::Result<Vec<Target>>;

    /// Insert a finding and return its row id.
    fn create_finding(&self, finding: &AuditFinding) -> anyhow::Result<i64>;
    fn get_findings_by_run(&self, run_id: &str) -> anyhow::Result<Vec<AuditFinding>>;
}
