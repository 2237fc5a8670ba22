use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::config::ACTIVITY_BUFFER_SIZE;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub source: ActivitySource,
    pub level: ActivityLevel,
    pub run_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    Engine,
    Probe,
    Api,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

/// Recent audit lifecycle events, kept in a fixed-size buffer and fanned out
/// to live subscribers.
pub struct ActivityLog {
    buffer: Arc<RwLock<VecDeque<ActivityEntry>>>,
    sender: broadcast::Sender<ActivityEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(ACTIVITY_BUFFER_SIZE))),
            sender,
        }
    }

    pub async fn push(&self, entry: ActivityEntry) {
        let mut buf = self.buffer.write().await;
        if buf.len() >= ACTIVITY_BUFFER_SIZE {
            buf.pop_front();
        }
        buf.push_back(entry.clone());
        drop(buf);

        let _ = self.sender.send(entry);
    }

    pub async fn history(&self) -> Vec<ActivityEntry> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.sender.subscribe()
    }

    pub async fn emit(
        &self,
        source: ActivitySource,
        level: ActivityLevel,
        run_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            source,
            level,
            run_id: run_id.map(str::to_string),
            message: message.into(),
        };
        self.push(entry).await;
    }
}
