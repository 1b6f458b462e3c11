//! Backup validator
//!
//! Independent cross-check against the bridge service's own records.
//! Catches proposals the bridge never recorded, amounts that drifted and
//! proposals replayed long after creation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::proposal::{Proposal, RejectionSeverity};

use super::{ApprovalBot, BotIdentity, BotVerdict, RiskAssessment, MAX_RISK};

/// Bridge service's record of a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRecord {
    pub amount: f64,
    pub status: String,
}

/// Bridge-service facts
#[async_trait]
pub trait BackupFacts: Send + Sync {
    async fn is_bridge_service_healthy(&self) -> anyhow::Result<bool>;

    async fn is_database_reachable(&self) -> anyhow::Result<bool>;

    async fn get_proposal_from_database(
        &self,
        bridge_tx_id: &str,
    ) -> anyhow::Result<Option<BridgeRecord>>;
}

/// Backup validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Maximum proposal age in seconds
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Relative amount tolerance against the bridge record
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: f64,
}

fn default_freshness_secs() -> u64 { 600 }
fn default_amount_tolerance() -> f64 { 0.001 }

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            freshness_secs: default_freshness_secs(),
            amount_tolerance: default_amount_tolerance(),
        }
    }
}

const UNAVAILABLE_RISK: u8 = 80;

pub struct BackupValidator {
    identity: BotIdentity,
    config: BackupConfig,
    facts: Arc<dyn BackupFacts>,
    clock: Arc<dyn Clock>,
}

impl BackupValidator {
    pub fn new(
        identity: BotIdentity,
        config: BackupConfig,
        facts: Arc<dyn BackupFacts>,
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

        if self.facts.is_bridge_service_healthy().await? {
            assessment.pass("service_health", "healthy");
        } else {
            assessment.fail("service_health", "bridge service unhealthy", UNAVAILABLE_RISK);
        }

        if self.facts.is_database_reachable().await? {
            assessment.pass("database", "reachable");
            match self
                .facts
                .get_proposal_from_database(&proposal.bridge_tx_id)
                .await?
            {
                None => assessment.fail(
                    "bridge_record",
                    format!("no bridge record for {}", proposal.bridge_tx_id),
                    UNAVAILABLE_RISK,
                ),
                Some(record) => {
                    assessment.pass("bridge_record", format!("status {}", record.status));
                    let tolerance = proposal.amount * self.config.amount_tolerance;
                    if (record.amount - proposal.amount).abs() <= tolerance {
                        assessment.pass("record_amount", "matches");
                    } else {
                        assessment.fail(
                            "record_amount",
                            format!(
                                "bridge record amount {} differs from proposal amount {}",
                                record.amount, proposal.amount
                            ),
                            MAX_RISK,
                        );
                    }
                }
            }
        } else {
            assessment.fail("database", "bridge database unreachable", UNAVAILABLE_RISK);
        }

        let age = self.clock.now() - proposal.created_at;
        if age.num_seconds() > self.config.freshness_secs as i64 {
            assessment.fail(
                "freshness",
                format!(
                    "proposal is {}s old (max {}s)",
                    age.num_seconds(),
                    self.config.freshness_secs
                ),
                MAX_RISK,
            );
        } else {
            assessment.pass("freshness", format!("{}s old", age.num_seconds()));
        }

        Ok(assessment)
    }
}

#[async_trait]
impl ApprovalBot for BackupValidator {
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
                    "Backup validation complete"
                );
                self.identity.verdict(proposal, result, self.clock.now())
            }
            Err(e) => {
                warn!(proposal_id = %proposal.id, error = %e, "Backup validation errored");
                self.identity.failure_verdict(
                    format!("backup validation error: {}", e),
                    RejectionSeverity::Warning,
                    self.clock.now(),
                )
            }
        }
    }
}
