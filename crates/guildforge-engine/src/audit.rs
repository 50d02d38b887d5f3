//! Audit trail for plans, rollbacks and cleanup.
//!
//! Sinks never fail the caller: a record that can't be written is logged and
//! dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use guildforge_core::SessionKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A plan ran to completion.
    PlanExecuted,
    /// A rollback stack was unwound.
    RollbackExecuted,
    /// An abandoned or expired session was cleaned up.
    SessionExpired,
    /// A plan step or precondition failed.
    StepFailed,
    /// A live resource was deleted by a plan.
    ResourceDeleted,
    /// A deployed panel record was dropped because its resource is gone.
    PanelUntracked,
}

impl AuditEventType {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlanExecuted => "plan_executed",
            Self::RollbackExecuted => "rollback_executed",
            Self::SessionExpired => "session_expired",
            Self::StepFailed => "step_failed",
            Self::ResourceDeleted => "resource_deleted",
            Self::PanelUntracked => "panel_untracked",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,
    /// Event type.
    pub event_type: AuditEventType,
    /// Session the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
    /// Step involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Human-readable summary.
    pub summary: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an event stamped now.
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        session_key: Option<SessionKey>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            session_key,
            step: None,
            summary: summary.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the step the event concerns.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

/// Receives audit records.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: AuditEvent);
}

/// Writes events as structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let session = event
            .session_key
            .map_or_else(|| "-".to_string(), |k| k.to_string());
        tracing::info!(
            target: "guildforge::audit",
            event_id = %event.event_id,
            event_type = %event.event_type,
            session = %session,
            step = event.step.as_deref().unwrap_or("-"),
            "{}",
            event.summary
        );
    }
}

/// Appends events to a file, one JSON object per line.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    /// Open (or create) the audit log at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the audit log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode audit event");
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to append audit event"
            );
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded events of one type.
    #[must_use]
    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildforge_core::{InitiatorId, TenantId};

    #[test]
    fn json_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesAuditSink::open(&path).unwrap();
        let key = SessionKey::new(TenantId::new(1), InitiatorId::new(2));

        sink.record(AuditEvent::new(AuditEventType::PlanExecuted, Some(key), "3 create"));
        sink.record(
            AuditEvent::new(AuditEventType::StepFailed, Some(key), "boom")
                .with_step("category:Support"),
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<AuditEvent> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::PlanExecuted);
        assert_eq!(events[1].step.as_deref(), Some("category:Support"));
        assert!(contents.contains("\"step_failed\""));
    }

    #[test]
    fn memory_sink_filters_by_type() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventType::PanelUntracked, None, "a"));
        sink.record(AuditEvent::new(AuditEventType::SessionExpired, None, "b"));
        assert_eq!(sink.of_type(AuditEventType::PanelUntracked).len(), 1);
        assert_eq!(sink.events().len(), 2);
    }
}
