use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::store::AuditStore;
use super::{
    AuditFinding, AuditRun, Classification, FixStatus, LocalizedText, Priority,
    RecommendationType, RunStatus, RunType, Target, TargetKind,
};
use crate::config::AUDIT_DB_FILE;
use crate::error::AuditError;

pub struct AuditDb {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

const RUN_COLUMNS: &str = "id, run_number, run_type, scope, status, initiated_by, started_at, completed_at,
     duration_ms, total_targets, tested_targets, passed_targets, failed_targets, partial_targets,
     readiness_score, breakdown, change_from_previous, previous_run_id, error_message";

const TARGET_COLUMNS: &str = "id, test_id, name, name_ar, kind, path, selector, api_endpoint, api_method,
     parent_test_id, required_role, current_classification, current_score, last_tested_at,
     test_history, is_active";

const FINDING_COLUMNS: &str = "id, run_id, target_id, classification, score, test_results,
     failure_reason_en, failure_reason_ar, recommendation_en, recommendation_ar,
     recommendation_type, priority, fix_status, created_at";

impl AuditDb {
    /// Open (or create) `audit.db` inside `data_dir`.
    pub fn new(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join(AUDIT_DB_FILE))
    }

    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };
        db.init_schema()?;
        db.fail_interrupted_runs()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audit_runs (
                id TEXT PRIMARY KEY,
                run_number INTEGER NOT NULL,
                run_type TEXT NOT NULL,
                scope TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                initiated_by TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                total_targets INTEGER NOT NULL DEFAULT 0,
                tested_targets INTEGER NOT NULL DEFAULT 0,
                passed_targets INTEGER NOT NULL DEFAULT 0,
                failed_targets INTEGER NOT NULL DEFAULT 0,
                partial_targets INTEGER NOT NULL DEFAULT 0,
                readiness_score REAL NOT NULL DEFAULT 0,
                breakdown TEXT NOT NULL DEFAULT '{}',
                change_from_previous REAL,
                previous_run_id TEXT,
                error_message TEXT
            );

            CREATE TABLE IF NOT EXISTS audit_targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                name_ar TEXT NOT NULL,
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                selector TEXT,
                api_endpoint TEXT,
                api_method TEXT,
                parent_test_id TEXT,
                required_role TEXT,
                current_classification TEXT,
                current_score REAL,
                last_tested_at TEXT,
                test_history TEXT NOT NULL DEFAULT '[]',
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS audit_findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES audit_runs(id) ON DELETE CASCADE,
                target_id INTEGER NOT NULL REFERENCES audit_targets(id),
                classification TEXT NOT NULL,
                score REAL NOT NULL,
                test_results TEXT NOT NULL,
                failure_reason_en TEXT,
                failure_reason_ar TEXT,
                recommendation_en TEXT,
                recommendation_ar TEXT,
                recommendation_type TEXT,
                priority TEXT NOT NULL,
                fix_status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_af_run_id ON audit_findings(run_id);
            CREATE INDEX IF NOT EXISTS idx_af_target_id ON audit_findings(target_id);
            CREATE INDEX IF NOT EXISTS idx_ar_run_number ON audit_runs(run_number);
            CREATE INDEX IF NOT EXISTS idx_ar_status ON audit_runs(status);
        ",
        )?;
        Ok(())
    }

    /// Runs still `running` at open time belong to a process that died mid-run.
    fn fail_interrupted_runs(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE audit_runs SET status='failed', error_message='interrupted', completed_at=?1
             WHERE status='running'",
            params![Utc::now()],
        )?;
        if updated > 0 {
            info!("Marked {} interrupted audit run(s) as failed", updated);
        }
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_text<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {:?}", value).into(),
        )
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn localized(en: Option<String>, ar: Option<String>) -> Option<LocalizedText> {
    match (en, ar) {
        (Some(en), Some(ar)) => Some(LocalizedText { en, ar }),
        (Some(en), None) => Some(LocalizedText { en, ar: String::new() }),
        (None, Some(ar)) => Some(LocalizedText { en: String::new(), ar }),
        (None, None) => None,
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRun> {
    Ok(AuditRun {
        id: row.get(0)?,
        run_number: row.get(1)?,
        run_type: parse_text(2, row.get(2)?, RunType::parse)?,
        scope: row.get(3)?,
        status: parse_text(4, row.get(4)?, RunStatus::parse)?,
        initiated_by: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        duration_ms: row.get(8)?,
        total_targets: row.get(9)?,
        tested_targets: row.get(10)?,
        passed_targets: row.get(11)?,
        failed_targets: row.get(12)?,
        partial_targets: row.get(13)?,
        readiness_score: row.get(14)?,
        breakdown: parse_json(15, row.get(15)?)?,
        change_from_previous: row.get(16)?,
        previous_run_id: row.get(17)?,
        error_message: row.get(18)?,
    })
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    Ok(Target {
        id: row.get(0)?,
        test_id: row.get(1)?,
        name: row.get(2)?,
        name_ar: row.get(3)?,
        kind: parse_text(4, row.get(4)?, TargetKind::parse)?,
        path: row.get(5)?,
        selector: row.get(6)?,
        api_endpoint: row.get(7)?,
        api_method: row.get(8)?,
        parent_test_id: row.get(9)?,
        required_role: row.get(10)?,
        current_classification: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_text(11, s, Classification::parse))
            .transpose()?,
        current_score: row.get(12)?,
        last_tested_at: row.get(13)?,
        test_history: parse_json(14, row.get(14)?)?,
        is_active: row.get::<_, i64>(15)? != 0,
    })
}

fn finding_from_row(row: &Row<'_>) -> rusqlite::Result<AuditFinding> {
    Ok(AuditFinding {
        id: row.get(0)?,
        run_id: row.get(1)?,
        target_id: row.get(2)?,
        classification: parse_text(3, row.get(3)?, Classification::parse)?,
        score: row.get(4)?,
        test_results: parse_json(5, row.get(5)?)?,
        failure_reason: localized(row.get(6)?, row.get(7)?),
        recommendation: localized(row.get(8)?, row.get(9)?),
        recommendation_type: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_text(10, s, RecommendationType::parse))
            .transpose()?,
        priority: parse_text(11, row.get(11)?, Priority::parse)?,
        fix_status: parse_text(12, row.get(12)?, FixStatus::parse)?,
        created_at: row.get(13)?,
    })
}

// ============================================================================
// Store implementation
// ============================================================================

impl AuditStore for AuditDb {
    fn create_run(&self, run: &AuditRun) -> anyhow::Result<()> {
        let breakdown = to_json(&run.breakdown)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_runs (id, run_number, run_type, scope, status, initiated_by, started_at,
                total_targets, readiness_score, breakdown, previous_run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id,
                run.run_number,
                run.run_type.as_str(),
                run.scope,
                run.status.as_str(),
                run.initiated_by,
                run.started_at,
                run.total_targets,
                run.readiness_score,
                breakdown,
                run.previous_run_id,
            ],
        )?;
        Ok(())
    }

    fn update_run(&self, run: &AuditRun) -> anyhow::Result<()> {
        let breakdown = to_json(&run.breakdown)?;
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE audit_runs SET
                status=?2, completed_at=?3, duration_ms=?4, total_targets=?5, tested_targets=?6,
                passed_targets=?7, failed_targets=?8, partial_targets=?9, readiness_score=?10,
                breakdown=?11, change_from_previous=?12, error_message=?13
             WHERE id=?1 AND status='running'",
            params![
                run.id,
                run.status.as_str(),
                run.completed_at,
                run.duration_ms,
                run.total_targets,
                run.tested_targets,
                run.passed_targets,
                run.failed_targets,
                run.partial_targets,
                run.readiness_score,
                breakdown,
                run.change_from_previous,
                run.error_message,
            ],
        )?;
        if updated == 0 {
            return Err(AuditError::RunAlreadyFinished(run.id.clone()).into());
        }
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> anyhow::Result<Option<AuditRun>> {
        let conn = self.conn();
        let run = conn
            .query_row(
                &format!("SELECT {} FROM audit_runs WHERE id=?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn get_latest_run(&self) -> anyhow::Result<Option<AuditRun>> {
        let conn = self.conn();
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM audit_runs ORDER BY run_number DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn list_runs(&self, limit: i64) -> anyhow::Result<Vec<AuditRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_runs ORDER BY run_number DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], run_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn create_target(&self, target: &Target) -> anyhow::Result<i64> {
        let history = to_json(&target.test_history)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_targets (test_id, name, name_ar, kind, path, selector, api_endpoint,
                api_method, parent_test_id, required_role, current_classification, current_score,
                last_tested_at, test_history, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(test_id) DO NOTHING",
            params![
                target.test_id,
                target.name,
                target.name_ar,
                target.kind.as_str(),
                target.path,
                target.selector,
                target.api_endpoint,
                target.api_method,
                target.parent_test_id,
                target.required_role,
                target.current_classification.map(|c| c.as_str()),
                target.current_score,
                target.last_tested_at,
                history,
                target.is_active as i64,
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM audit_targets WHERE test_id=?1",
            params![target.test_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn update_target(&self, target: &Target) -> anyhow::Result<()> {
        let history = to_json(&target.test_history)?;
        let conn = self.conn();
        conn.execute(
            "UPDATE audit_targets SET
                name=?2, name_ar=?3, kind=?4, path=?5, selector=?6, api_endpoint=?7, api_method=?8,
                parent_test_id=?9, required_role=?10, current_classification=?11, current_score=?12,
                last_tested_at=?13, test_history=?14, is_active=?15
             WHERE test_id=?1",
            params![
                target.test_id,
                target.name,
                target.name_ar,
                target.kind.as_str(),
                target.path,
                target.selector,
                target.api_endpoint,
                target.api_method,
                target.parent_test_id,
                target.required_role,
                target.current_classification.map(|c| c.as_str()),
                target.current_score,
                target.last_tested_at,
                history,
                target.is_active as i64,
            ],
        )?;
        Ok(())
    }

    fn get_target_by_test_id(&self, test_id: &str) -> anyhow::Result<Option<Target>> {
        let conn = self.conn();
        let target = conn
            .query_row(
                &format!("SELECT {} FROM audit_targets WHERE test_id=?1", TARGET_COLUMNS),
                params![test_id],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    fn get_all_targets(&self) -> anyhow::Result<Vec<Target>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_targets ORDER BY id",
            TARGET_COLUMNS
        ))?;
        let rows = stmt.query_map([], target_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn create_finding(&self, finding: &AuditFinding) -> anyhow::Result<i64> {
        let test_results = to_json(&finding.test_results)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_findings (run_id, target_id, classification, score, test_results,
                failure_reason_en, failure_reason_ar, recommendation_en, recommendation_ar,
                recommendation_type, priority, fix_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                finding.run_id,
                finding.target_id,
                finding.classification.as_str(),
                finding.score,
                test_results,
                finding.failure_reason.as_ref().map(|t| t.en.as_str()),
                finding.failure_reason.as_ref().map(|t| t.ar.as_str()),
                finding.recommendation.as_ref().map(|t| t.en.as_str()),
                finding.recommendation.as_ref().map(|t| t.ar.as_str()),
                finding.recommendation_type.map(|t| t.as_str()),
                finding.priority.as_str(),
                finding.fix_status.as_str(),
                finding.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_findings_by_run(&self, run_id: &str) -> anyhow::Result<Vec<AuditFinding>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_findings WHERE run_id=?1 ORDER BY id",
            FINDING_COLUMNS
        ))?;
        let rows = stmt.query_map(params![run_id], finding_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
