//! Append-only audit trail
//!
//! Capped in-memory ring of security-relevant events. Every append is also
//! mirrored to tracing at the level matching its severity.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

/// Audit severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
    /// Operator override (force reset, manual pause)
    Manual,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditSeverity::Info => write!(f, "info"),
            AuditSeverity::Warning => write!(f, "warning"),
            AuditSeverity::Critical => write!(f, "critical"),
            AuditSeverity::Manual => write!(f, "manual"),
        }
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,

    /// Event name, e.g. "proposal_created"
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,

    pub severity: AuditSeverity,

    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

impl AuditEntry {
    pub fn new(timestamp: DateTime<Utc>, event: impl Into<String>, severity: AuditSeverity) -> Self {
        Self {
            timestamp,
            event: event.into(),
            proposal_id: None,
            bot_id: None,
            severity,
            details: BTreeMap::new(),
        }
    }

    pub fn with_proposal(mut self, proposal_id: impl Into<String>) -> Self {
        self.proposal_id = Some(proposal_id.into());
        self
    }

    pub fn with_bot(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = Some(bot_id.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Capped ring buffer of audit entries
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest once full
    pub fn record(&self, entry: AuditEntry) {
        match entry.severity {
            AuditSeverity::Critical => error!(
                event = %entry.event,
                proposal_id = ?entry.proposal_id,
                bot = ?entry.bot_id,
                details = ?entry.details,
                "audit"
            ),
            AuditSeverity::Warning | AuditSeverity::Manual => warn!(
                event = %entry.event,
                severity = %entry.severity,
                proposal_id = ?entry.proposal_id,
                bot = ?entry.bot_id,
                details = ?entry.details,
                "audit"
            ),
            AuditSeverity::Info => info!(
                event = %entry.event,
                proposal_id = ?entry.proposal_id,
                bot = ?entry.bot_id,
                "audit"
            ),
        }

        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
