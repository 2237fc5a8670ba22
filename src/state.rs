use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::activity::ActivityLog;
use crate::audit::engine::AuditEngine;
use crate::audit::probe::ProbeRunner;
use crate::audit::store::AuditStore;
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::registry::Registry;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AuditConfig,
    pub engine: Arc<AuditEngine>,
    pub coordinator: Arc<AuditCoordinator>,
    pub activity: Arc<ActivityLog>,
}

impl AppState {
    /// Wire the engine, coordinator, and activity log around a store.
    pub fn new(
        config: AuditConfig,
        registry: Registry,
        store: Arc<dyn AuditStore>,
    ) -> anyhow::Result<Self> {
        let activity = Arc::new(ActivityLog::new());
        let coordinator = Arc::new(AuditCoordinator::new());
        let prober = ProbeRunner::new(&config.base_url, config.probe_timeout, config.unreachable)?;
        let engine = AuditEngine::new(store, Arc::new(registry), prober)
            .with_activity(activity.clone())
            .with_coordinator(coordinator.clone())
            .with_max_concurrent_probes(config.max_concurrent_probes);

        Ok(Self {
            config,
            engine: Arc::new(engine),
            coordinator,
            activity,
        })
    }
}

/// The single "active run" slot of an engine instance.
pub struct ActiveAudit {
    pub running: bool,
    pub current_run_id: Option<String>,
    pub completed_targets: usize,
    pub total_targets: usize,
    pub stop_tx: Option<watch::Sender<bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatus {
    pub running: bool,
    pub current_run_id: Option<String>,
    pub completed_targets: usize,
    pub total_targets: usize,
}

/// Tracks which run is active, how far it has got, and how to stop it.
pub struct AuditCoordinator {
    active: RwLock<ActiveAudit>,
}

impl Default for ActiveAudit {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveAudit {
    pub fn new() -> Self {
        Self {
            running: false,
            current_run_id: None,
            completed_targets: 0,
            total_targets: 0,
            stop_tx: None,
        }
    }
}

impl Default for AuditCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditCoordinator {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(ActiveAudit::new()),
        }
    }

    /// Claim the active slot. Returns the stop receiver the run must watch.
    pub async fn try_begin(&self) -> Result<watch::Receiver<bool>, AuditError> {
        let mut active = self.active.write().await;
        if active.running {
            return Err(AuditError::AuditInProgress);
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        *active = ActiveAudit {
            running: true,
            stop_tx: Some(stop_tx),
            ..ActiveAudit::new()
        };
        Ok(stop_rx)
    }

    pub async fn attach_run(&self, run_id: &str, total_targets: usize) {
        let mut active = self.active.write().await;
        active.current_run_id = Some(run_id.to_string());
        active.total_targets = total_targets;
        active.completed_targets = 0;
    }

    pub async fn target_done(&self) {
        let mut active = self.active.write().await;
        active.completed_targets += 1;
    }

    /// Signal the active run to stop. Returns false when nothing is running.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.write().await;
        if !active.running {
            return false;
        }
        if let Some(tx) = active.stop_tx.take() {
            let _ = tx.send(true);
        }
        true
    }

    /// Release the active slot.
    pub async fn finish(&self) {
        let mut active = self.active.write().await;
        *active = ActiveAudit::new();
    }

    pub async fn status(&self) -> AuditStatus {
        let active = self.active.read().await;
        AuditStatus {
            running: active.running,
            current_run_id: active.current_run_id.clone(),
            completed_targets: active.completed_targets,
            total_targets: active.total_targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_coordinator_starts_idle() {
        let coordinator = AuditCoordinator::new();
        let status = coordinator.status().await;
        assert!(!status.running);
        assert!(status.current_run_id.is_none());
        assert!(!coordinator.stop().await);
    }

    #[tokio::test]
    async fn test_second_begin_is_rejected_until_finish() {
        let coordinator = AuditCoordinator::new();
        let _rx = coordinator.try_begin().await.unwrap();
        assert!(matches!(
            coordinator.try_begin().await,
            Err(AuditError::AuditInProgress)
        ));
        coordinator.finish().await;
        assert!(coordinator.try_begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_signals_receiver() {
        let coordinator = AuditCoordinator::new();
        let rx = coordinator.try_begin().await.unwrap();
        assert!(!*rx.borrow());
        assert!(coordinator.stop().await);
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_progress_tracking() {
        let coordinator = AuditCoordinator::new();
        let _rx = coordinator.try_begin().await.unwrap();
        coordinator.attach_run("run-1", 3).await;
        coordinator.target_done().await;
        coordinator.target_done().await;
        let status = coordinator.status().await;
        assert_eq!(status.current_run_id.as_deref(), Some("run-1"));
        assert_eq!(status.completed_targets, 2);
        assert_eq!(status.total_targets, 3);
    }
}
