//! Bot identity and approval MACs
//!
//! Each bot signs the proposal's immutable identity fields with its own
//! secret (HMAC-SHA256), so approvals are attributable per bot and one bot
//! cannot produce another's approval.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::proposal::{
    Approval, BotRole, Proposal, Rejection, RejectionSeverity, ValidationResult,
};

use super::{BotVerdict, CRITICAL_THRESHOLD};

type HmacSha256 = Hmac<Sha256>;

/// A bot's id, role and signing secret
#[derive(Clone)]
pub struct BotIdentity {
    id: String,
    role: BotRole,
    secret: Vec<u8>,
}

impl std::fmt::Debug for BotIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotIdentity")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("secret", &"***")
            .finish()
    }
}

impl BotIdentity {
    pub fn new(id: impl Into<String>, role: BotRole, secret: impl AsRef<[u8]>) -> Self {
        Self {
            id: id.into(),
            role,
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> BotRole {
        self.role
    }

    fn mac(&self, proposal: &Proposal) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 takes keys of any size"));
        mac.update(self.id.as_bytes());
        mac.update(b"|");
        mac.update(&proposal.signing_payload());
        mac
    }

    /// Hex HMAC over the proposal identity
    pub fn sign(&self, proposal: &Proposal) -> String {
        hex::encode(self.mac(proposal).finalize().into_bytes())
    }

    /// Constant-time check of a hex signature
    pub fn verify_signature(&self, proposal: &Proposal, signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let expected = self.mac(proposal).finalize().into_bytes();
        if provided.len() != expected.len() {
            return false;
        }
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    /// Check an approval claims this identity and carries a valid MAC
    pub fn verify(&self, proposal: &Proposal, approval: &Approval) -> bool {
        approval.bot_id == self.id
            && approval.role == self.role
            && self.verify_signature(proposal, &approval.signature)
    }

    /// Turn a validation report into a verdict
    ///
    /// Approves only when the report is valid; rejections at or above the
    /// critical threshold are critical.
    pub fn verdict(
        &self,
        proposal: &Proposal,
        result: ValidationResult,
        now: DateTime<Utc>,
    ) -> BotVerdict {
        if result.valid {
            return BotVerdict::Approve(Approval {
                bot_id: self.id.clone(),
                role: self.role,
                timestamp: now,
                signature: self.sign(proposal),
                validation: result,
            });
        }

        let severity = if result.risk_score >= CRITICAL_THRESHOLD {
            RejectionSeverity::Critical
        } else {
            RejectionSeverity::Warning
        };
        let failed = result.failed_checks().join(", ");
        BotVerdict::Reject(Rejection {
            bot_id: self.id.clone(),
            role: self.role,
            timestamp: now,
            reason: format!("risk score {} (failed: {})", result.risk_score, failed),
            severity,
            validation: Some(result),
        })
    }

    /// Rejection for a bot that could not complete its checks
    pub fn failure_verdict(
        &self,
        reason: impl Into<String>,
        severity: RejectionSeverity,
        now: DateTime<Utc>,
    ) -> BotVerdict {
        BotVerdict::Reject(Rejection {
            bot_id: self.id.clone(),
            role: self.role,
            timestamp: now,
            reason: reason.into(),
            severity,
            validation: None,
        })
    }
}
