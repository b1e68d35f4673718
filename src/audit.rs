/// Audit logging for set mutations
///
/// Every mutation handled over HTTP, successful or not, is appended to the
/// audit log as one JSON object per line.
use crate::core::engine::{Outcome, Task};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AddElement,
    DeleteElement,
    FlushSet,
}

impl From<Task> for EventType {
    fn from(task: Task) -> Self {
        match task {
            Task::Add => EventType::AddElement,
            Task::Delete => EventType::DeleteElement,
            Task::Flush => EventType::FlushSet,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Whether the mutation was committed (or was already in effect)
    pub success: bool,

    /// `set`, `address` and `outcome`
    pub details: serde_json::Value,

    /// Error message if the mutation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds the record for one finished reconciliation.
    ///
    /// `outcome` is the advisory label: an [`Outcome`] on success, the
    /// failure label (possibly empty) otherwise.
    pub fn mutation(
        task: Task,
        set: &str,
        address: Option<&str>,
        result: Result<Outcome, (&str, String)>,
    ) -> Self {
        let (success, outcome, error) = match result {
            Ok(outcome) => (true, outcome.as_str(), None),
            Err((label, message)) => (false, label, Some(message)),
        };

        Self::new(
            task.into(),
            success,
            serde_json::json!({
                "set": set,
                "address": address,
                "outcome": outcome,
            }),
            error,
        )
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Appends `event`, downgrading a write failure to a warning.
    pub async fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!(path = %self.log_path.display(), "Failed to write audit log: {}", e);
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}
