//! Core proposal types
//!
//! Defines proposals, bot verdicts and validation reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key holding the source-chain transaction reference
pub const SOURCE_TX_KEY: &str = "source_tx";

/// Status of a proposal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Collecting bot verdicts
    Pending,

    /// Quorum reached, waiting for execution (and timelock)
    Approved,

    /// Signing / submission in progress
    Executing,

    /// Submitted on-chain
    Executed,

    /// Vetoed by a bot
    Rejected,

    /// TTL elapsed before quorum
    Expired,

    /// Signing or submission failed
    Failed,
}

impl ProposalStatus {
    /// No further transitions possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Executed
                | ProposalStatus::Rejected
                | ProposalStatus::Expired
                | ProposalStatus::Failed
        )
    }

    /// Only reachable by passing through `Approved`
    pub fn is_approved_or_later(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Approved
                | ProposalStatus::Executing
                | ProposalStatus::Executed
                | ProposalStatus::Failed
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Approved => write!(f, "approved"),
            ProposalStatus::Executing => write!(f, "executing"),
            ProposalStatus::Executed => write!(f, "executed"),
            ProposalStatus::Rejected => write!(f, "rejected"),
            ProposalStatus::Expired => write!(f, "expired"),
            ProposalStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Validator role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BotRole {
    /// Cross-checks the source-chain transaction
    Origin,

    /// Velocity, volume and balance checks
    Risk,

    /// Service health and bridge record cross-reference
    Backup,
}

impl std::fmt::Display for BotRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotRole::Origin => write!(f, "origin"),
            BotRole::Risk => write!(f, "risk"),
            BotRole::Backup => write!(f, "backup"),
        }
    }
}

/// Rejection severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionSeverity {
    Warning,
    /// Feeds the circuit breaker
    Critical,
}

impl std::fmt::Display for RejectionSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionSeverity::Warning => write!(f, "warning"),
            RejectionSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// One named check inside a validation report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// A bot's validation report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub checks: Vec<ValidationCheck>,
    /// 0-100
    pub risk_score: u8,
}

impl ValidationResult {
    /// Names of failed checks
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Signed bot approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub bot_id: String,
    pub role: BotRole,
    pub timestamp: DateTime<Utc>,
    /// Hex HMAC over the proposal's immutable fields
    pub signature: String,
    pub validation: ValidationResult,
}

/// Bot rejection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rejection {
    pub bot_id: String,
    pub role: BotRole,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub severity: RejectionSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// A request to move funds, gated on bot approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub bridge_tx_id: String,
    pub recipient: String,
    pub amount: f64,
    pub asset: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub timelock_until: Option<DateTime<Utc>>,
    pub status: ProposalStatus,
    pub approvals: Vec<Approval>,
    pub rejections: Vec<Rejection>,
    pub required_approvals: usize,
    pub total_bots: usize,
    pub execution_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Immutable identity fields covered by bot signatures
#[derive(Serialize)]
struct ProposalSigningBinding<'a> {
    id: &'a str,
    recipient: &'a str,
    amount: f64,
    asset: &'a str,
}

impl Proposal {
    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    pub fn has_approved(&self, bot_id: &str) -> bool {
        self.approvals.iter().any(|a| a.bot_id == bot_id)
    }

    /// High-value proposals need every bot
    pub fn requires_unanimity(&self) -> bool {
        self.required_approvals == self.total_bots
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left on the timelock, if any
    pub fn timelock_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.timelock_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Source-chain transaction reference from metadata
    pub fn source_tx(&self) -> Option<&str> {
        self.metadata
            .get(SOURCE_TX_KEY)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Canonical bytes bots sign over
    pub fn signing_payload(&self) -> Vec<u8> {
        let binding = ProposalSigningBinding {
            id: &self.id,
            recipient: &self.recipient,
            amount: self.amount,
            asset: &self.asset,
        };
        // A struct of plain strings and a float always serializes
        serde_json::to_vec(&binding).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Proposal {
        let now = Utc::now();
        Proposal {
            id: "p1".to_string(),
            bridge_tx_id: "btx1".to_string(),
            recipient: "recipient".to_string(),
            amount: 100.0,
            asset: "LUSDT".to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(5),
            timelock_until: Some(now + Duration::minutes(10)),
            status: ProposalStatus::Pending,
            approvals: vec![],
            rejections: vec![],
            required_approvals: 2,
            total_bots: 3,
            execution_signature: None,
            failure_reason: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(ProposalStatus::Executed.is_terminal());
        assert!(!ProposalStatus::Approved.is_terminal());
        assert!(ProposalStatus::Failed.is_approved_or_later());
        assert!(!ProposalStatus::Rejected.is_approved_or_later());
    }

    #[test]
    fn test_timelock_remaining() {
        let p = sample();
        let now = p.created_at;
        assert_eq!(p.timelock_remaining(now), Some(Duration::minutes(10)));
        assert_eq!(p.timelock_remaining(now + Duration::minutes(11)), None);
    }

    #[test]
    fn test_signing_payload_covers_identity_only() {
        let mut p = sample();
        let before = p.signing_payload();
        p.status = ProposalStatus::Approved;
        p.metadata.insert("note".to_string(), "x".to_string());
        assert_eq!(before, p.signing_payload());

        p.amount = 101.0;
        assert_ne!(before, p.signing_payload());
    }

    #[test]
    fn test_source_tx_blank_is_missing() {
        let mut p = sample();
        assert!(p.source_tx().is_none());
        p.metadata.insert(SOURCE_TX_KEY.to_string(), "  ".to_string());
        assert!(p.source_tx().is_none());
        p.metadata.insert(SOURCE_TX_KEY.to_string(), "0xabc".to_string());
        assert_eq!(p.source_tx(), Some("0xabc"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProposalStatus::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
    }
}
