//! Audit trail for warden and student actions
//!
//! One JSON object per line, appended to a file when configured, and always
//! mirrored to the `audit` tracing target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    RoomCreated,
    ApplicationSubmitted,
    ApplicationApproved,
    ApplicationRejected,
    RoomAllocated,
    AllocationRefused,
    AllocationCancelled,
    System,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    pub actor: String,          // warden/student id or "system"
    pub target: Option<String>, // affected record
    pub message: String,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct AuditLogger {
    file: Option<Mutex<File>>,
}

impl AuditLogger {
    /// Append to `path`; falls back to tracing-only if the file cannot be opened
    pub fn new(path: Option<&Path>) -> Self {
        let file = path.and_then(|p| {
            match OpenOptions::new().create(true).append(true).open(p) {
                Ok(f) => Some(Mutex::new(f)),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "audit log unavailable");
                    None
                }
            }
        });
        Self { file }
    }

    /// Tracing-only logger
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Log an audit entry
    pub fn log(&self, entry: AuditEntry) {
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
        }
        tracing::info!(target: "audit", event = ?entry.event, actor = %entry.actor, "{}", entry.message);
    }

    /// Convenience for logging an event
    pub fn log_event(
        &self,
        event: AuditEventType,
        actor: impl Into<String>,
        target: Option<String>,
        message: impl Into<String>,
        meta: Option<serde_json::Value>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target,
            message: message.into(),
            meta,
        };
        self.log(entry);
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_audit_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger::new(Some(&path));

        logger.log_event(
            AuditEventType::RoomAllocated,
            "warden-7",
            Some("alloc-1".to_string()),
            "room r1 allocated",
            Some(serde_json::json!({ "room_id": "r1" })),
        );
        logger.log_event(
            AuditEventType::AllocationCancelled,
            "warden-7",
            Some("alloc-1".to_string()),
            "allocation cancelled",
            None,
        );

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEntry = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.event, AuditEventType::RoomAllocated);
        assert_eq!(first.actor, "warden-7");
    }

    #[test]
    fn test_disabled_logger() {
        let logger = AuditLogger::disabled();
        logger.log_event(AuditEventType::System, "system", None, "started", None);
    }
}
