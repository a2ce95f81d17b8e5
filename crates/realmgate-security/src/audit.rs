//! Audit trail of authentication outcomes

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: i64,
    pub subject: String,
    pub realm: String,
    pub outcome: String,
    pub details: String,
}

impl AuditEntry {
    /// Create a new audit entry stamped with the current time
    pub fn new(
        subject: impl Into<String>,
        realm: impl Into<String>,
        outcome: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            subject: subject.into(),
            realm: realm.into(),
            outcome: outcome.into(),
            details: details.into(),
        }
    }
}

/// Receiver of audit entries. Implementations must not block for long; they
/// are called on the login path.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Emits each entry as a structured tracing event
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "realmgate::audit",
            subject = %entry.subject,
            realm = %entry.realm,
            outcome = %entry.outcome,
            "{}",
            entry.details
        );
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Get entries for a specific subject
    pub fn entries_for_subject(&self, subject: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}
