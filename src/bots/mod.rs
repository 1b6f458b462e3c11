//! Approval bots
//!
//! Three independent validators, each cross-checking a proposal against
//! its own source of truth:
//!
//! - [`OriginValidator`]: source-chain transaction exists, is finalized and matches
//! - [`RiskValidator`]: velocity, recipient volume and vault balance
//! - [`BackupValidator`]: service health, bridge record and proposal freshness
//!
//! # Contract
//!
//! `evaluate` always resolves to a verdict. Fact-source errors become
//! warning rejections; no answer is never read as approval.

pub mod backup;
pub mod origin;
pub mod risk;
pub mod signing;

use async_trait::async_trait;

use crate::proposal::{Approval, BotRole, Proposal, Rejection, ValidationCheck, ValidationResult};

pub use backup::{BackupConfig, BackupFacts, BackupValidator, BridgeRecord};
pub use origin::{OriginConfig, OriginFacts, OriginValidator};
pub use risk::{RecipientHistory, RiskConfig, RiskFacts, RiskValidator};
pub use signing::BotIdentity;

/// Risk score at or above which a bot rejects
pub const BLOCK_THRESHOLD: u8 = 80;

/// Risk score at or above which a rejection is critical
pub const CRITICAL_THRESHOLD: u8 = 90;

/// Maximum risk score
pub const MAX_RISK: u8 = 100;

/// A bot's answer for one proposal
#[derive(Debug, Clone)]
pub enum BotVerdict {
    Approve(Approval),
    Reject(Rejection),
}

impl BotVerdict {
    pub fn bot_id(&self) -> &str {
        match self {
            BotVerdict::Approve(a) => &a.bot_id,
            BotVerdict::Reject(r) => &r.bot_id,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, BotVerdict::Approve(_))
    }
}

/// A validator taking part in the quorum
#[async_trait]
pub trait ApprovalBot: Send + Sync {
    /// Identity used for signing and attribution
    fn identity(&self) -> &BotIdentity;

    fn id(&self) -> &str {
        self.identity().id()
    }

    fn role(&self) -> BotRole {
        self.identity().role()
    }

    /// Evaluate a proposal. Never fails.
    async fn evaluate(&self, proposal: &Proposal) -> BotVerdict;

    /// Check an approval was produced by this bot for this proposal
    fn verify(&self, proposal: &Proposal, approval: &Approval) -> bool {
        self.identity().verify(proposal, approval)
    }
}

/// Accumulates named checks and their risk contributions
#[derive(Debug, Default)]
pub struct RiskAssessment {
    checks: Vec<ValidationCheck>,
    score: u32,
}

impl RiskAssessment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        });
    }

    pub fn fail(&mut self, name: &str, detail: impl Into<String>, risk: u8) {
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        });
        self.score += risk as u32;
    }

    /// Summed score, capped at 100
    pub fn score(&self) -> u8 {
        self.score.min(MAX_RISK as u32) as u8
    }

    pub fn into_result(self) -> ValidationResult {
        let risk_score = self.score();
        ValidationResult {
            valid: risk_score < BLOCK_THRESHOLD,
            checks: self.checks,
            risk_score,
        }
    }
}
