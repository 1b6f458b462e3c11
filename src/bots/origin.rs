//! Origin validator
//!
//! Confirms the source-chain transaction behind a proposal exists, is
//! finalized (not merely confirmed) and carries the same amount.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::proposal::{Proposal, RejectionSeverity};

use super::{ApprovalBot, BotIdentity, BotVerdict, RiskAssessment, MAX_RISK};

/// Source-chain facts
#[async_trait]
pub trait OriginFacts: Send + Sync {
    async fn is_source_transaction_finalized(&self, source_tx: &str) -> anyhow::Result<bool>;

    /// `None` when the transaction cannot be found
    async fn get_source_transaction_amount(&self, source_tx: &str)
        -> anyhow::Result<Option<f64>>;
}

/// Origin validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Relative amount tolerance (0.001 = 0.1%)
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: f64,
}

fn default_amount_tolerance() -> f64 { 0.001 }

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: default_amount_tolerance(),
        }
    }
}

/// Risk added when the proposal carries no source reference
const MISSING_REFERENCE_RISK: u8 = 80;

pub struct OriginValidator {
    identity: BotIdentity,
    config: OriginConfig,
    facts: Arc<dyn OriginFacts>,
    clock: Arc<dyn Clock>,
}

impl OriginValidator {
    pub fn new(
        identity: BotIdentity,
        config: OriginConfig,
        facts: Arc<dyn OriginFacts>,
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
        let mut assessment = RiskAssessment::new();

        let Some(source_tx) = proposal.source_tx() else {
            assessment.fail(
                "source_reference",
                "proposal has no source transaction reference",
                MISSING_REFERENCE_RISK,
            );
            return Ok(assessment);
        };
        assessment.pass("source_reference", source_tx);

        let Some(source_amount) = self.facts.get_source_transaction_amount(source_tx).await? else {
            assessment.fail(
                "source_exists",
                format!("source transaction {} not found", source_tx),
                MAX_RISK,
            );
            return Ok(assessment);
        };
        assessment.pass("source_exists", format!("source amount {}", source_amount));

        if self.facts.is_source_transaction_finalized(source_tx).await? {
            assessment.pass("source_finalized", "finalized");
        } else {
            assessment.fail(
                "source_finalized",
                "source transaction is not finalized",
                MAX_RISK,
            );
        }

        let tolerance = proposal.amount * self.config.amount_tolerance;
        let diff = (source_amount - proposal.amount).abs();
        if diff <= tolerance {
            assessment.pass("amount_match", format!("diff {:.6} within {:.6}", diff, tolerance));
        } else {
            assessment.fail(
                "amount_match",
                format!(
                    "source amount {} does not match proposal amount {}",
                    source_amount, proposal.amount
                ),
                MAX_RISK,
            );
        }

        Ok(assessment)
    }
}

#[async_trait]
impl ApprovalBot for OriginValidator {
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
                    "Origin validation complete"
                );
                self.identity.verdict(proposal, result, self.clock.now())
            }
            Err(e) => {
                warn!(proposal_id = %proposal.id, error = %e, "Origin validation errored");
                self.identity.failure_verdict(
                    format!("origin validation error: {}", e),
                    RejectionSeverity::Warning,
                    self.clock.now(),
                )
            }
        }
    }
}
