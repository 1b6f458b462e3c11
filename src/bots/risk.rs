//! Risk validator
//!
//! Scores a proposal on transfer velocity, per-recipient volume and
//! vault solvency.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::proposal::{Proposal, RejectionSeverity};

use super::{ApprovalBot, BotIdentity, BotVerdict, RiskAssessment, MAX_RISK};

/// Transfers received by one recipient over the trailing 24 hours
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientHistory {
    pub total_sent: f64,
    pub tx_count: u32,
}

/// Vault-side facts
#[async_trait]
pub trait RiskFacts: Send + Sync {
    /// Proposals created in the last `window_minutes`
    async fn get_recent_proposal_count(&self, window_minutes: u64) -> anyhow::Result<u32>;

    /// Rolling daily received volume for `recipient`
    async fn get_recipient_history(&self, recipient: &str) -> anyhow::Result<RecipientHistory>;

    async fn get_vault_balance(&self) -> anyhow::Result<f64>;
}

/// Risk validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_velocity_window_minutes")]
    pub velocity_window_minutes: u64,

    /// Proposals allowed per velocity window
    #[serde(default = "default_max_proposals_per_window")]
    pub max_proposals_per_window: u32,

    /// Amounts at or above this are flagged (informational)
    #[serde(default = "default_large_amount_threshold")]
    pub large_amount_threshold: f64,

    /// Cap on a single recipient's rolling daily received volume
    #[serde(default = "default_recipient_daily_cap")]
    pub recipient_daily_cap: f64,
}

fn default_velocity_window_minutes() -> u64 { 60 }
fn default_max_proposals_per_window() -> u32 { 20 }
fn default_large_amount_threshold() -> f64 { 5_000.0 }
fn default_recipient_daily_cap() -> f64 { 20_000.0 }

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            velocity_window_minutes: default_velocity_window_minutes(),
            max_proposals_per_window: default_max_proposals_per_window(),
            large_amount_threshold: default_large_amount_threshold(),
            recipient_daily_cap: default_recipient_daily_cap(),
        }
    }
}

const VELOCITY_RISK: u8 = 50;
const LARGE_AMOUNT_RISK: u8 = 20;
const RECIPIENT_VOLUME_RISK: u8 = 50;

pub struct RiskValidator {
    identity: BotIdentity,
    config: RiskConfig,
    facts: Arc<dyn RiskFacts>,
    clock: Arc<dyn Clock>,
}

impl RiskValidator {
    pub fn new(
        identity: BotIdentity,
        config: RiskConfig,
        facts: Arc<dyn RiskFacts>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            config,
            facts,
            clock,
        }
    }

    async fn assess(&self, proposal: &Proposal) -> anyhow::Result<RiskAssessment> {
        let (recent, history, balance) = futures::try_join!(
            self.facts
                .get_recent_proposal_count(self.config.velocity_window_minutes),
            self.facts.get_recipient_history(&proposal.recipient),
            self.facts.get_vault_balance(),
        )?;

        let mut assessment = RiskAssessment::new();

        if recent >= self.config.max_proposals_per_window {
            assessment.fail(
                "velocity",
                format!(
                    "{} proposals in {}m (max {})",
                    recent, self.config.velocity_window_minutes, self.config.max_proposals_per_window
                ),
                VELOCITY_RISK,
            );
        } else {
            assessment.pass("velocity", format!("{} recent proposals", recent));
        }

        if proposal.amount >= self.config.large_amount_threshold {
            assessment.fail(
                "large_amount",
                format!(
                    "amount {} at or above {}",
                    proposal.amount, self.config.large_amount_threshold
                ),
                LARGE_AMOUNT_RISK,
            );
        } else {
            assessment.pass("large_amount", "below threshold");
        }

        let projected = history.total_sent + proposal.amount;
        if projected > self.config.recipient_daily_cap {
            assessment.fail(
                "recipient_volume",
                format!(
                    "recipient volume {} would exceed cap {} ({} prior transfers)",
                    projected, self.config.recipient_daily_cap, history.tx_count
                ),
                RECIPIENT_VOLUME_RISK,
            );
        } else {
            assessment.pass("recipient_volume", format!("projected {}", projected));
        }

        if balance < proposal.amount {
            assessment.fail(
                "vault_balance",
                format!("vault balance {} below amount {}", balance, proposal.amount),
                MAX_RISK,
            );
        } else {
            assessment.pass("vault_balance", format!("balance {}", balance));
        }

        Ok(assessment)
    }
}

#[async_trait]
impl ApprovalBot for RiskValidator {
    fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    async fn evaluate(&self, proposal: &Proposal) -> BotVerdict {
        match self.assess(proposal).await {
            Ok(assessment) => {
                let result = assessment.into_result();
                debug!(
                    proposal_id = %proposal.id,
                    bot = %self.identity.id(),
                    risk_score = result.risk_score,
                    "Risk validation complete"
                );
                self.identity.verdict(proposal, result, self.clock.now())
            }
            Err(e) => {
                warn!(proposal_id = %proposal.id, error = %e, "Risk validation errored");
                self.identity.failure_verdict(
                    format!("risk validation error: {}", e),
                    RejectionSeverity::Warning,
                    self.clock.now(),
                )
            }
        }
    }
}
