//! Proposal manager - lifecycle, quorum and spending limits
//!
//! The manager is the only writer of proposals, the spending ledger and
//! (through its failure/success reports) the circuit breaker counters.
//! Every transition is checked against the proposal's current status and
//! fails loudly when the proposal is not in the expected state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditSeverity};
use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::error::{Error, Result};

use super::ledger::{SpendingLedger, SpendingStatus, SpendingWindow};
use super::types::{Approval, Proposal, ProposalStatus, Rejection, RejectionSeverity};

/// Proposal lifecycle and limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalConfig {
    /// Default quorum for normal-value proposals
    #[serde(default = "default_required_approvals")]
    pub required_approvals: usize,

    /// Proposal TTL while pending
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Amounts at or above this need every bot and a timelock
    #[serde(default = "default_high_value_threshold")]
    pub high_value_threshold: f64,

    /// Delay between approval and execution for high-value proposals
    #[serde(default = "default_timelock_secs")]
    pub timelock_secs: u64,

    #[serde(default = "default_max_single_transfer")]
    pub max_single_transfer: f64,

    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: f64,

    #[serde(default = "default_daily_limit")]
    pub daily_limit: f64,

    /// How long terminal proposals are kept before cleanup prunes them
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_required_approvals() -> usize { 2 }
fn default_ttl_secs() -> u64 { 300 }
fn default_high_value_threshold() -> f64 { 5_000.0 }
fn default_timelock_secs() -> u64 { 600 }
fn default_max_single_transfer() -> f64 { 10_000.0 }
fn default_hourly_limit() -> f64 { 25_000.0 }
fn default_daily_limit() -> f64 { 100_000.0 }
fn default_retention_secs() -> u64 { 86_400 }
fn default_audit_capacity() -> usize { 10_000 }

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            required_approvals: default_required_approvals(),
            ttl_secs: default_ttl_secs(),
            high_value_threshold: default_high_value_threshold(),
            timelock_secs: default_timelock_secs(),
            max_single_transfer: default_max_single_transfer(),
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
            retention_secs: default_retention_secs(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

/// Proposal counts by status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalStats {
    pub total: usize,
    pub by_status: HashMap<ProposalStatus, usize>,
}

impl ProposalStats {
    pub fn count(&self, status: ProposalStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Owner of proposal lifecycle state
pub struct ProposalManager {
    config: ProposalConfig,
    total_bots: usize,
    proposals: DashMap<String, Proposal>,
    /// bridge tx id -> proposal id
    by_bridge_tx: DashMap<String, String>,
    /// bridge tx id -> proposal id, for every proposal that reached
    /// `Executing`. Never pruned.
    settled_bridge_tx: DashMap<String, String>,
    ledger: Mutex<SpendingLedger>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl ProposalManager {
    /// Create a manager for a pipeline with `total_bots` validators
    pub fn new(
        config: ProposalConfig,
        total_bots: usize,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = SpendingLedger::new(clock.now());
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            config,
            total_bots,
            proposals: DashMap::new(),
            by_bridge_tx: DashMap::new(),
            settled_bridge_tx: DashMap::new(),
            ledger: Mutex::new(ledger),
            breaker,
            clock,
            audit,
        }
    }

    pub fn config(&self) -> &ProposalConfig {
        &self.config
    }

    pub fn total_bots(&self) -> usize {
        self.total_bots
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn entry(&self, event: &str, severity: AuditSeverity, proposal_id: &str) -> AuditEntry {
        AuditEntry::new(self.clock.now(), event, severity).with_proposal(proposal_id)
    }

    /// Create a new pending proposal
    pub fn create_proposal(
        &self,
        bridge_tx_id: &str,
        recipient: &str,
        amount: f64,
        asset: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Proposal> {
        if !self.breaker.can_execute() {
            let state = self.breaker.state();
            self.audit.record(
                AuditEntry::new(self.clock.now(), "proposal_blocked", AuditSeverity::Warning)
                    .with_detail("bridge_tx_id", bridge_tx_id)
                    .with_detail("breaker_state", state.to_string()),
            );
            return Err(Error::CircuitOpen { state });
        }

        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidAmount(format!(
                "amount must be a positive number, got {}",
                amount
            )));
        }
        if recipient.trim().is_empty() {
            return Err(Error::InvalidRecipient("recipient is empty".to_string()));
        }
        if asset.trim().is_empty() {
            return Err(Error::InvalidAsset("asset is empty".to_string()));
        }

        let now = self.clock.now();
        self.check_limits(amount)?;

        if let Some(settled) = self.settled_bridge_tx.get(bridge_tx_id) {
            return Err(Error::DuplicateBridgeTransaction {
                bridge_tx_id: bridge_tx_id.to_string(),
                proposal_id: settled.value().clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let high_value = amount >= self.config.high_value_threshold;
        let (required_approvals, timelock_until) = if high_value {
            (
                self.total_bots,
                Some(now + Duration::seconds(self.config.timelock_secs as i64)),
            )
        } else {
            (self.config.required_approvals.min(self.total_bots), None)
        };

        let proposal = Proposal {
            id: id.clone(),
            bridge_tx_id: bridge_tx_id.to_string(),
            recipient: recipient.to_string(),
            amount,
            asset: asset.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(self.config.ttl_secs as i64),
            timelock_until,
            status: ProposalStatus::Pending,
            approvals: Vec::new(),
            rejections: Vec::new(),
            required_approvals,
            total_bots: self.total_bots,
            execution_signature: None,
            failure_reason: None,
            metadata,
        };

        // The proposal is inserted while the index entry is held, so an
        // entry with nothing behind it is only seen mid-prune.
        match self.by_bridge_tx.entry(bridge_tx_id.to_string()) {
            Entry::Occupied(mut existing) => {
                let reusable = self
                    .proposals
                    .get(existing.get())
                    .map(|p| {
                        matches!(p.status, ProposalStatus::Rejected | ProposalStatus::Expired)
                    })
                    .unwrap_or(false);
                if !reusable {
                    return Err(Error::DuplicateBridgeTransaction {
                        bridge_tx_id: bridge_tx_id.to_string(),
                        proposal_id: existing.get().clone(),
                    });
                }
                self.proposals.insert(id.clone(), proposal.clone());
                existing.insert(id.clone());
            }
            Entry::Vacant(slot) => {
                self.proposals.insert(id.clone(), proposal.clone());
                slot.insert(id.clone());
            }
        }

        info!(
            proposal_id = %id,
            bridge_tx_id = %bridge_tx_id,
            amount,
            required_approvals,
            high_value,
            "Proposal created"
        );
        self.audit.record(
            self.entry("proposal_created", AuditSeverity::Info, &id)
                .with_detail("bridge_tx_id", bridge_tx_id)
                .with_detail("amount", amount)
                .with_detail("required_approvals", required_approvals)
                .with_detail("high_value", high_value),
        );

        Ok(proposal)
    }

    fn check_limits(&self, amount: f64) -> Result<()> {
        if amount > self.config.max_single_transfer {
            return Err(Error::SingleTransferLimitExceeded {
                amount,
                limit: self.config.max_single_transfer,
            });
        }

        let mut ledger = self.ledger.lock();
        ledger.reset_if_elapsed(self.clock.now());
        self.check_windows(&ledger, amount)
    }

    /// Hourly and daily caps against executed plus in-flight spend
    fn check_windows(&self, ledger: &SpendingLedger, amount: f64) -> Result<()> {
        let hourly = ledger.committed(SpendingWindow::Hourly);
        if hourly + amount > self.config.hourly_limit {
            return Err(Error::HourlyLimitExceeded {
                spent: hourly,
                requested: amount,
                limit: self.config.hourly_limit,
            });
        }
        let daily = ledger.committed(SpendingWindow::Daily);
        if daily + amount > self.config.daily_limit {
            return Err(Error::DailyLimitExceeded {
                spent: daily,
                requested: amount,
                limit: self.config.daily_limit,
            });
        }
        Ok(())
    }

    /// Add a bot approval; transitions to `Approved` on reaching quorum
    pub fn add_approval(&self, proposal_id: &str, approval: Approval) -> Result<Proposal> {
        let now = self.clock.now();
        let mut guard = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = guard.value_mut();

        if proposal.status == ProposalStatus::Pending && proposal.is_expired_at(now) {
            proposal.status = ProposalStatus::Expired;
            proposal.updated_at = now;
            drop(guard);
            self.audit.record(self.entry("proposal_expired", AuditSeverity::Warning, proposal_id));
            return Err(Error::ProposalExpired(proposal_id.to_string()));
        }

        if proposal.status != ProposalStatus::Pending {
            return Err(Error::InvalidTransition {
                proposal_id: proposal_id.to_string(),
                actual: proposal.status,
                expected: ProposalStatus::Pending,
            });
        }

        if proposal.has_approved(&approval.bot_id) {
            return Err(Error::DuplicateApproval {
                proposal_id: proposal_id.to_string(),
                bot_id: approval.bot_id,
            });
        }

        if !approval.validation.valid {
            return Err(Error::InvalidApproval {
                proposal_id: proposal_id.to_string(),
                bot_id: approval.bot_id,
                reason: "approval carries a validation report marked invalid".to_string(),
            });
        }

        let bot_id = approval.bot_id.clone();
        let risk_score = approval.validation.risk_score;
        proposal.approvals.push(approval);
        proposal.updated_at = now;
        let reached = proposal.approval_count() >= proposal.required_approvals;
        if reached {
            proposal.status = ProposalStatus::Approved;
        }
        let snapshot = proposal.clone();
        drop(guard);

        debug!(
            proposal_id = %proposal_id,
            bot = %bot_id,
            approvals = snapshot.approval_count(),
            required = snapshot.required_approvals,
            "Approval added"
        );
        self.audit.record(
            self.entry("approval_added", AuditSeverity::Info, proposal_id)
                .with_bot(bot_id)
                .with_detail("risk_score", risk_score),
        );
        if reached {
            info!(proposal_id = %proposal_id, "Proposal approved");
            self.audit.record(
                self.entry("proposal_approved", AuditSeverity::Info, proposal_id)
                    .with_detail("approvals", snapshot.approval_count()),
            );
        }

        Ok(snapshot)
    }

    /// Add a bot rejection; a single rejection vetoes the proposal
    pub fn add_rejection(&self, proposal_id: &str, rejection: Rejection) -> Result<Proposal> {
        let now = self.clock.now();
        let mut guard = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = guard.value_mut();

        if proposal.status != ProposalStatus::Pending {
            return Err(Error::InvalidTransition {
                proposal_id: proposal_id.to_string(),
                actual: proposal.status,
                expected: ProposalStatus::Pending,
            });
        }

        let bot_id = rejection.bot_id.clone();
        let reason = rejection.reason.clone();
        let severity = rejection.severity;
        proposal.rejections.push(rejection);
        proposal.status = ProposalStatus::Rejected;
        proposal.updated_at = now;
        let snapshot = proposal.clone();
        drop(guard);

        warn!(
            proposal_id = %proposal_id,
            bot = %bot_id,
            severity = %severity,
            reason = %reason,
            "Proposal rejected"
        );
        let audit_severity = match severity {
            RejectionSeverity::Critical => AuditSeverity::Critical,
            RejectionSeverity::Warning => AuditSeverity::Warning,
        };
        self.audit.record(
            self.entry("proposal_rejected", audit_severity, proposal_id)
                .with_bot(bot_id.clone())
                .with_detail("reason", reason.clone()),
        );

        if severity == RejectionSeverity::Critical {
            self.breaker
                .record_failure(&format!("critical rejection by {}: {}", bot_id, reason));
        }

        Ok(snapshot)
    }

    /// Move an approved proposal to `Executing`
    ///
    /// Fails with `TimelockActive` while a timelock is still running so the
    /// caller can retry later. Limits are checked again here and the amount
    /// is reserved until the execution settles, so approved proposals that
    /// waited out a timelock together cannot overrun a window.
    pub fn mark_executing(&self, proposal_id: &str) -> Result<Proposal> {
        let now = self.clock.now();
        let mut guard = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = guard.value_mut();

        if proposal.status != ProposalStatus::Approved {
            return Err(Error::InvalidTransition {
                proposal_id: proposal_id.to_string(),
                actual: proposal.status,
                expected: ProposalStatus::Approved,
            });
        }

        if let Some(remaining) = proposal.timelock_remaining(now) {
            return Err(Error::TimelockActive {
                proposal_id: proposal_id.to_string(),
                remaining_secs: ((remaining.num_milliseconds() + 999) / 1000) as u64,
            });
        }

        if proposal.approval_count() < proposal.required_approvals {
            return Err(Error::QuorumNotReached {
                proposal_id: proposal_id.to_string(),
                approvals: proposal.approval_count(),
                required: proposal.required_approvals,
            });
        }

        if !self.breaker.can_execute() {
            return Err(Error::CircuitOpen {
                state: self.breaker.state(),
            });
        }

        let amount = proposal.amount;
        let reserved = {
            let mut ledger = self.ledger.lock();
            ledger.reset_if_elapsed(now);
            let checked = self.check_windows(&ledger, amount);
            if checked.is_ok() {
                ledger.reserve(amount);
            }
            checked
        };
        if let Err(e) = reserved {
            drop(guard);
            warn!(proposal_id = %proposal_id, error = %e, "Execution deferred by spending limit");
            self.audit.record(
                self.entry("execution_deferred", AuditSeverity::Warning, proposal_id)
                    .with_detail("reason", e.to_string()),
            );
            return Err(e);
        }

        proposal.status = ProposalStatus::Executing;
        proposal.updated_at = now;
        let snapshot = proposal.clone();
        drop(guard);

        self.settled_bridge_tx
            .insert(snapshot.bridge_tx_id.clone(), snapshot.id.clone());

        self.audit.record(self.entry("execution_started", AuditSeverity::Info, proposal_id));
        Ok(snapshot)
    }

    /// Record a successful on-chain execution
    pub fn mark_executed(&self, proposal_id: &str, signature: &str) -> Result<Proposal> {
        let now = self.clock.now();
        let mut guard = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = guard.value_mut();

        if proposal.status != ProposalStatus::Executing {
            return Err(Error::InvalidTransition {
                proposal_id: proposal_id.to_string(),
                actual: proposal.status,
                expected: ProposalStatus::Executing,
            });
        }

        proposal.status = ProposalStatus::Executed;
        proposal.execution_signature = Some(signature.to_string());
        proposal.updated_at = now;
        let snapshot = proposal.clone();
        drop(guard);

        self.ledger.lock().settle(now, snapshot.amount);
        self.breaker.record_success();

        info!(
            proposal_id = %proposal_id,
            amount = snapshot.amount,
            signature = %signature,
            "Proposal executed"
        );
        self.audit.record(
            self.entry("proposal_executed", AuditSeverity::Info, proposal_id)
                .with_detail("signature", signature)
                .with_detail("amount", snapshot.amount),
        );

        Ok(snapshot)
    }

    /// Record a failed execution; feeds the circuit breaker
    pub fn mark_failed(&self, proposal_id: &str, reason: &str) -> Result<Proposal> {
        let now = self.clock.now();
        let mut guard = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| Error::ProposalNotFound(proposal_id.to_string()))?;
        let proposal = guard.value_mut();

        if proposal.status != ProposalStatus::Executing {
            return Err(Error::InvalidTransition {
                proposal_id: proposal_id.to_string(),
                actual: proposal.status,
                expected: ProposalStatus::Executing,
            });
        }

        proposal.status = ProposalStatus::Failed;
        proposal.failure_reason = Some(reason.to_string());
        proposal.updated_at = now;
        let snapshot = proposal.clone();
        drop(guard);

        self.ledger.lock().release(snapshot.amount);
        self.breaker
            .record_failure(&format!("execution failed for {}: {}", proposal_id, reason));
        self.audit.record(
            self.entry("execution_failed", AuditSeverity::Critical, proposal_id)
                .with_detail("reason", reason),
        );

        Ok(snapshot)
    }

    /// Approved proposals whose timelock (if any) has elapsed, oldest first
    pub fn get_ready_to_execute(&self) -> Vec<Proposal> {
        let now = self.clock.now();
        let mut ready: Vec<Proposal> = self
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Approved && p.timelock_remaining(now).is_none())
            .map(|p| p.value().clone())
            .collect();
        ready.sort_by_key(|p| p.created_at);
        ready
    }

    /// Expire stale pending proposals and prune old terminal ones
    ///
    /// Returns the number of proposals removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();

        let stale: Vec<String> = self
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Pending && p.is_expired_at(now))
            .map(|p| p.key().clone())
            .collect();
        for id in &stale {
            if let Some(mut guard) = self.proposals.get_mut(id) {
                // Re-check: a verdict may have landed since the scan
                if guard.status == ProposalStatus::Pending && guard.is_expired_at(now) {
                    guard.status = ProposalStatus::Expired;
                    guard.updated_at = now;
                    drop(guard);
                    self.audit.record(self.entry("proposal_expired", AuditSeverity::Warning, id));
                }
            }
        }

        let retention = Duration::seconds(self.config.retention_secs as i64);
        let prunable: Vec<String> = self
            .proposals
            .iter()
            .filter(|p| p.status.is_terminal() && now - p.updated_at >= retention)
            .map(|p| p.key().clone())
            .collect();

        let mut removed = 0;
        for id in prunable {
            let taken = self.proposals.remove_if(&id, |_, p| {
                p.status.is_terminal() && now - p.updated_at >= retention
            });
            if let Some((_, proposal)) = taken {
                self.by_bridge_tx
                    .remove_if(&proposal.bridge_tx_id, |_, pid| *pid == proposal.id);
                removed += 1;
            }
        }

        if removed > 0 || !stale.is_empty() {
            debug!(expired = stale.len(), removed, "Proposal cleanup complete");
        }
        removed
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Option<Proposal> {
        self.proposals.get(proposal_id).map(|p| p.value().clone())
    }

    /// Approved proposal for `bridge_tx_id` matching a repeated request
    ///
    /// Lets a caller that was told to wait out a timelock resend the same
    /// request instead of tripping the duplicate guard.
    pub fn find_resumable(
        &self,
        bridge_tx_id: &str,
        recipient: &str,
        amount: f64,
        asset: &str,
    ) -> Option<Proposal> {
        self.get_by_bridge_tx(bridge_tx_id).filter(|p| {
            p.status == ProposalStatus::Approved
                && p.recipient == recipient
                && p.amount == amount
                && p.asset == asset
        })
    }

    pub fn get_by_bridge_tx(&self, bridge_tx_id: &str) -> Option<Proposal> {
        let id = self.by_bridge_tx.get(bridge_tx_id)?.value().clone();
        self.get_proposal(&id)
    }

    pub fn list_by_status(&self, status: ProposalStatus) -> Vec<Proposal> {
        let mut list: Vec<Proposal> = self
            .proposals
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.value().clone())
            .collect();
        list.sort_by_key(|p| p.created_at);
        list
    }

    pub fn stats(&self) -> ProposalStats {
        let mut stats = ProposalStats::default();
        for p in self.proposals.iter() {
            stats.total += 1;
            *stats.by_status.entry(p.status).or_insert(0) += 1;
        }
        stats
    }

    pub fn spending_status(&self) -> SpendingStatus {
        let mut ledger = self.ledger.lock();
        ledger.reset_if_elapsed(self.clock.now());
        SpendingStatus {
            hourly_spent: ledger.hourly.spent,
            hourly_limit: self.config.hourly_limit,
            hourly_remaining: (self.config.hourly_limit - ledger.hourly.spent).max(0.0),
            hourly_resets_at: ledger.hourly.resets_at,
            daily_spent: ledger.daily.spent,
            daily_limit: self.config.daily_limit,
            daily_remaining: (self.config.daily_limit - ledger.daily.spent).max(0.0),
            daily_resets_at: ledger.daily.resets_at,
            max_single_transfer: self.config.max_single_transfer,
        }
    }

    /// Seed spending totals from a durable store after restart
    pub fn restore_spending(&self, window: SpendingWindow, spent: f64) {
        let mut ledger = self.ledger.lock();
        ledger.reset_if_elapsed(self.clock.now());
        ledger.set_spent(window, spent);
        drop(ledger);
        self.audit.record(
            AuditEntry::new(self.clock.now(), "spending_restored", AuditSeverity::Info)
                .with_detail("window", window.to_string())
                .with_detail("spent", spent),
        );
    }

    /// Reinstate a persisted proposal after restart
    ///
    /// A proposal persisted mid-execution is marked failed: whether it
    /// reached the chain is unknown and it must not be signed twice.
    pub fn restore_proposal(&self, mut proposal: Proposal) {
        if proposal.status == ProposalStatus::Executing {
            warn!(
                proposal_id = %proposal.id,
                "Proposal was executing at shutdown, marking failed for manual review"
            );
            proposal.status = ProposalStatus::Failed;
            proposal.failure_reason =
                Some("interrupted during execution; verify on-chain state".to_string());
            proposal.updated_at = self.clock.now();
            self.audit.record(
                self.entry("execution_interrupted", AuditSeverity::Critical, &proposal.id),
            );
        }

        if matches!(proposal.status, ProposalStatus::Executed | ProposalStatus::Failed) {
            self.settled_bridge_tx
                .insert(proposal.bridge_tx_id.clone(), proposal.id.clone());
        }

        match self.by_bridge_tx.entry(proposal.bridge_tx_id.clone()) {
            Entry::Occupied(mut existing) => {
                let newer = self
                    .proposals
                    .get(existing.get())
                    .map(|p| p.created_at < proposal.created_at)
                    .unwrap_or(true);
                if newer {
                    existing.insert(proposal.id.clone());
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(proposal.id.clone());
            }
        }
        self.proposals.insert(proposal.id.clone(), proposal);
    }

    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitState};
    use crate::clock::ManualClock;
    use crate::proposal::types::{BotRole, ValidationResult};
    use chrono::Utc;

    struct Harness {
        manager: ProposalManager,
        clock: Arc<ManualClock>,
    }

    fn harness(config: ProposalConfig, failure_threshold: u32) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold,
                ..CircuitBreakerConfig::default()
            },
            clock.clone(),
        ));
        Harness {
            manager: ProposalManager::new(config, 3, breaker, clock.clone()),
            clock,
        }
    }

    fn default_harness() -> Harness {
        harness(ProposalConfig::default(), 3)
    }

    fn approval(bot_id: &str, role: BotRole) -> Approval {
        Approval {
            bot_id: bot_id.to_string(),
            role,
            timestamp: Utc::now(),
            signature: "sig".to_string(),
            validation: ValidationResult {
                valid: true,
                checks: vec![],
                risk_score: 0,
            },
        }
    }

    fn rejection(bot_id: &str, reason: &str, severity: RejectionSeverity) -> Rejection {
        Rejection {
            bot_id: bot_id.to_string(),
            role: BotRole::Risk,
            timestamp: Utc::now(),
            reason: reason.to_string(),
            severity,
            validation: None,
        }
    }

    fn create(h: &Harness, bridge_tx: &str, amount: f64) -> Proposal {
        h.manager
            .create_proposal(bridge_tx, "recipient-1", amount, "LUSDT", BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn test_normal_flow_executes_and_counts_spend() {
        let h = default_harness();
        let p = create(&h, "btx-1", 1000.0);
        assert_eq!(p.required_approvals, 2);
        assert!(p.timelock_until.is_none());

        let after_one = h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        assert_eq!(after_one.status, ProposalStatus::Pending);
        let after_two = h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        assert_eq!(after_two.status, ProposalStatus::Approved);

        let executing = h.manager.mark_executing(&p.id).unwrap();
        assert_eq!(executing.status, ProposalStatus::Executing);

        let executed = h.manager.mark_executed(&p.id, "sig123").unwrap();
        assert_eq!(executed.execution_signature.as_deref(), Some("sig123"));
        assert_eq!(h.manager.spending_status().daily_spent, 1000.0);
        assert_eq!(h.manager.spending_status().hourly_spent, 1000.0);
    }

    #[test]
    fn test_high_value_requires_all_bots_and_timelock() {
        let h = default_harness();
        let p = create(&h, "btx-hv", 7000.0);
        assert_eq!(p.required_approvals, 3);
        assert!(p.requires_unanimity());
        let until = p.timelock_until.unwrap();
        assert_eq!(until - p.created_at, Duration::minutes(10));

        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        let two = h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        assert_eq!(two.status, ProposalStatus::Pending);
        h.manager.add_approval(&p.id, approval("backup", BotRole::Backup)).unwrap();

        let err = h.manager.mark_executing(&p.id).unwrap_err();
        assert!(err.to_string().contains("timelock"));
        assert!(matches!(err, Error::TimelockActive { remaining_secs: 600, .. }));

        h.clock.advance(Duration::minutes(10));
        let executing = h.manager.mark_executing(&p.id).unwrap();
        assert_eq!(executing.status, ProposalStatus::Executing);
    }

    #[test]
    fn test_rejection_vetoes_after_approvals() {
        let h = default_harness();
        let p = create(&h, "btx-veto", 7000.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();

        let rejected = h
            .manager
            .add_rejection(&p.id, rejection("backup", "fraud", RejectionSeverity::Critical))
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);

        let err = h
            .manager
            .add_approval(&p.id, approval("backup", BotRole::Backup))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { actual: ProposalStatus::Rejected, .. }));
    }

    #[test]
    fn test_duplicate_approval_rejected() {
        let h = harness(
            ProposalConfig {
                required_approvals: 3,
                ..ProposalConfig::default()
            },
            3,
        );
        let p = create(&h, "btx-dup", 100.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();

        let err = h
            .manager
            .add_approval(&p.id, approval("origin", BotRole::Origin))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateApproval { .. }));
        assert_eq!(h.manager.get_proposal(&p.id).unwrap().approval_count(), 1);
    }

    #[test]
    fn test_invalid_validation_report_refused() {
        let h = default_harness();
        let p = create(&h, "btx-inv", 100.0);
        let mut bad = approval("risk", BotRole::Risk);
        bad.validation.valid = false;

        let err = h.manager.add_approval(&p.id, bad).unwrap_err();
        assert!(matches!(err, Error::InvalidApproval { .. }));
    }

    #[test]
    fn test_critical_rejections_open_breaker() {
        let h = harness(ProposalConfig::default(), 2);

        let first = create(&h, "btx-a", 100.0);
        h.manager
            .add_rejection(&first.id, rejection("origin", "fraud", RejectionSeverity::Critical))
            .unwrap();
        let second = create(&h, "btx-b", 100.0);
        h.manager
            .add_rejection(&second.id, rejection("origin", "fraud", RejectionSeverity::Critical))
            .unwrap();

        assert_eq!(h.manager.breaker().state(), CircuitState::Open);
        let err = h
            .manager
            .create_proposal("btx-c", "recipient-1", 100.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("Circuit breaker OPEN"));
    }

    #[test]
    fn test_warning_rejection_does_not_feed_breaker() {
        let h = harness(ProposalConfig::default(), 1);
        let p = create(&h, "btx-w", 100.0);
        h.manager
            .add_rejection(&p.id, rejection("backup", "stale", RejectionSeverity::Warning))
            .unwrap();
        assert_eq!(h.manager.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn test_limits_enforced() {
        let h = harness(
            ProposalConfig {
                max_single_transfer: 1000.0,
                hourly_limit: 1500.0,
                daily_limit: 2500.0,
                high_value_threshold: 10_000.0,
                ..ProposalConfig::default()
            },
            10,
        );

        let err = h
            .manager
            .create_proposal("btx-big", "r", 1001.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::SingleTransferLimitExceeded { .. }));

        let p = create(&h, "btx-1", 1000.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        h.manager.mark_executing(&p.id).unwrap();
        h.manager.mark_executed(&p.id, "sig").unwrap();

        let err = h
            .manager
            .create_proposal("btx-2", "r", 600.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::HourlyLimitExceeded { .. }));

        // Hourly window rolls over, daily does not
        h.clock.advance(Duration::minutes(61));
        let p2 = create(&h, "btx-3", 1000.0);
        h.manager.add_approval(&p2.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p2.id, approval("risk", BotRole::Risk)).unwrap();
        h.manager.mark_executing(&p2.id).unwrap();
        h.manager.mark_executed(&p2.id, "sig2").unwrap();

        h.clock.advance(Duration::minutes(61));
        let err = h
            .manager
            .create_proposal("btx-4", "r", 600.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DailyLimitExceeded { .. }));
    }

    #[test]
    fn test_invalid_amount_refused() {
        let h = default_harness();
        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = h
                .manager
                .create_proposal("btx", "r", amount, "LUSDT", BTreeMap::new())
                .unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)));
        }
        let err = h
            .manager
            .create_proposal("btx", " ", 10.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecipient(_)));
        let err = h
            .manager
            .create_proposal("btx", "r", 10.0, "", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAsset(_)));
        assert!(err.is_policy_violation());
    }

    #[test]
    fn test_duplicate_bridge_tx_guard() {
        let h = default_harness();
        let first = create(&h, "btx-same", 100.0);
        let err = h
            .manager
            .create_proposal("btx-same", "r", 100.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBridgeTransaction { .. }));

        h.manager
            .add_rejection(&first.id, rejection("risk", "velocity", RejectionSeverity::Warning))
            .unwrap();
        let retry = create(&h, "btx-same", 100.0);
        assert_ne!(retry.id, first.id);
        assert_eq!(h.manager.get_by_bridge_tx("btx-same").unwrap().id, retry.id);
    }

    #[test]
    fn test_executed_bridge_tx_guarded_after_prune() {
        let h = default_harness();
        let p = create(&h, "btx-paid", 100.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        h.manager.mark_executing(&p.id).unwrap();
        h.manager.mark_executed(&p.id, "sig").unwrap();

        h.clock.advance(Duration::hours(25));
        assert_eq!(h.manager.cleanup(), 1);
        assert!(h.manager.get_proposal(&p.id).is_none());

        let err = h
            .manager
            .create_proposal("btx-paid", "recipient-1", 100.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateBridgeTransaction { ref proposal_id, .. } if *proposal_id == p.id
        ));
    }

    #[test]
    fn test_index_entry_without_proposal_is_not_reusable() {
        let h = default_harness();
        h.manager
            .by_bridge_tx
            .insert("btx-pending".to_string(), "in-progress".to_string());

        let err = h
            .manager
            .create_proposal("btx-pending", "recipient-1", 100.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBridgeTransaction { .. }));
    }

    #[test]
    fn test_timelocked_batch_cannot_overrun_hourly_limit() {
        let h = default_harness();
        let batch: Vec<Proposal> = (0..4)
            .map(|i| {
                let p = create(&h, &format!("btx-batch-{}", i), 9000.0);
                for bot in [("origin", BotRole::Origin), ("risk", BotRole::Risk), ("backup", BotRole::Backup)] {
                    h.manager.add_approval(&p.id, approval(bot.0, bot.1)).unwrap();
                }
                p
            })
            .collect();

        h.clock.advance(Duration::minutes(11));
        let mut executed = 0;
        for p in &batch {
            match h.manager.mark_executing(&p.id) {
                Ok(_) => {
                    h.manager.mark_executed(&p.id, "sig").unwrap();
                    executed += 1;
                }
                Err(e) => {
                    assert!(matches!(e, Error::HourlyLimitExceeded { .. }));
                    assert_eq!(h.manager.get_proposal(&p.id).unwrap().status, ProposalStatus::Approved);
                }
            }
        }
        assert_eq!(executed, 2);
        assert_eq!(h.manager.spending_status().hourly_spent, 18_000.0);

        // Deferred proposals go through once the window rolls over
        h.clock.advance(Duration::minutes(61));
        let third = &batch[2];
        h.manager.mark_executing(&third.id).unwrap();
        h.manager.mark_executed(&third.id, "sig").unwrap();
        assert_eq!(h.manager.spending_status().hourly_spent, 9000.0);
    }

    #[test]
    fn test_executing_reservation_blocks_concurrent_overrun() {
        let h = default_harness();
        let first = create(&h, "btx-r1", 9000.0);
        let second = create(&h, "btx-r2", 9000.0);
        let third = create(&h, "btx-r3", 9000.0);
        for p in [&first, &second, &third] {
            for bot in [("origin", BotRole::Origin), ("risk", BotRole::Risk), ("backup", BotRole::Backup)] {
                h.manager.add_approval(&p.id, approval(bot.0, bot.1)).unwrap();
            }
        }
        h.clock.advance(Duration::minutes(11));

        h.manager.mark_executing(&first.id).unwrap();
        h.manager.mark_executing(&second.id).unwrap();
        let err = h.manager.mark_executing(&third.id).unwrap_err();
        assert!(matches!(err, Error::HourlyLimitExceeded { .. }));

        // A failed execution releases its reservation
        h.manager.mark_failed(&first.id, "rpc down").unwrap();
        h.manager.mark_executing(&third.id).unwrap();
    }

    #[test]
    fn test_find_resumable_matches_approved_request() {
        let h = default_harness();
        let p = create(&h, "btx-tl", 7000.0);
        assert!(h.manager.find_resumable("btx-tl", "recipient-1", 7000.0, "LUSDT").is_none());

        for bot in [("origin", BotRole::Origin), ("risk", BotRole::Risk), ("backup", BotRole::Backup)] {
            h.manager.add_approval(&p.id, approval(bot.0, bot.1)).unwrap();
        }
        let found = h.manager.find_resumable("btx-tl", "recipient-1", 7000.0, "LUSDT").unwrap();
        assert_eq!(found.id, p.id);
        assert!(h.manager.find_resumable("btx-tl", "someone-else", 7000.0, "LUSDT").is_none());
        assert!(h.manager.find_resumable("btx-tl", "recipient-1", 7001.0, "LUSDT").is_none());
    }

    #[test]
    fn test_expired_proposal_refuses_approval() {
        let h = default_harness();
        let p = create(&h, "btx-exp", 100.0);
        h.clock.advance(Duration::minutes(5));

        let err = h
            .manager
            .add_approval(&p.id, approval("origin", BotRole::Origin))
            .unwrap_err();
        assert!(matches!(err, Error::ProposalExpired(_)));
        assert_eq!(h.manager.get_proposal(&p.id).unwrap().status, ProposalStatus::Expired);
    }

    #[test]
    fn test_single_shot_terminal_transitions() {
        let h = default_harness();
        let p = create(&h, "btx-once", 100.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();

        h.manager.mark_executing(&p.id).unwrap();
        assert!(h.manager.mark_executing(&p.id).is_err());

        h.manager.mark_executed(&p.id, "sig").unwrap();
        assert!(h.manager.mark_executed(&p.id, "sig").is_err());
        assert!(h.manager.mark_failed(&p.id, "late").is_err());
        assert_eq!(h.manager.spending_status().daily_spent, 100.0);
    }

    #[test]
    fn test_mark_failed_feeds_breaker() {
        let h = harness(ProposalConfig::default(), 1);
        let p = create(&h, "btx-fail", 100.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        h.manager.mark_executing(&p.id).unwrap();

        let failed = h.manager.mark_failed(&p.id, "rpc timeout").unwrap();
        assert_eq!(failed.status, ProposalStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("rpc timeout"));
        assert_eq!(h.manager.breaker().state(), CircuitState::Open);
        assert_eq!(h.manager.spending_status().daily_spent, 0.0);
    }

    #[test]
    fn test_ready_queue_respects_timelock() {
        let h = default_harness();
        let small = create(&h, "btx-s", 100.0);
        let big = create(&h, "btx-b", 6000.0);
        for bot in [("origin", BotRole::Origin), ("risk", BotRole::Risk), ("backup", BotRole::Backup)] {
            h.manager.add_approval(&big.id, approval(bot.0, bot.1)).unwrap();
        }
        h.manager.add_approval(&small.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&small.id, approval("risk", BotRole::Risk)).unwrap();

        let ready: Vec<_> = h.manager.get_ready_to_execute().into_iter().map(|p| p.id).collect();
        assert_eq!(ready, vec![small.id.clone()]);

        h.clock.advance(Duration::minutes(11));
        assert_eq!(h.manager.get_ready_to_execute().len(), 2);
    }

    #[test]
    fn test_cleanup_expires_prunes_and_is_idempotent() {
        let h = default_harness();
        let stale = create(&h, "btx-stale", 100.0);
        let vetoed = create(&h, "btx-veto", 100.0);
        h.manager
            .add_rejection(&vetoed.id, rejection("risk", "no", RejectionSeverity::Warning))
            .unwrap();

        h.clock.advance(Duration::minutes(6));
        assert_eq!(h.manager.cleanup(), 0);
        assert_eq!(h.manager.get_proposal(&stale.id).unwrap().status, ProposalStatus::Expired);

        h.clock.advance(Duration::hours(24));
        assert_eq!(h.manager.cleanup(), 2);
        assert!(h.manager.get_proposal(&vetoed.id).is_none());
        assert!(h.manager.get_by_bridge_tx("btx-veto").is_none());
        assert_eq!(h.manager.cleanup(), 0);
    }

    #[test]
    fn test_quorum_invariant_holds() {
        let h = default_harness();
        let p = create(&h, "btx-inv", 100.0);
        let after = h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        assert_eq!(
            after.approval_count() >= after.required_approvals,
            after.status.is_approved_or_later()
        );
        let after = h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        assert_eq!(
            after.approval_count() >= after.required_approvals,
            after.status.is_approved_or_later()
        );
    }

    #[test]
    fn test_stats_and_restore_spending() {
        let h = default_harness();
        create(&h, "btx-1", 100.0);
        create(&h, "btx-2", 100.0);
        let stats = h.manager.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(ProposalStatus::Pending), 2);

        h.manager.restore_spending(SpendingWindow::Daily, 4200.0);
        let status = h.manager.spending_status();
        assert_eq!(status.daily_spent, 4200.0);
        assert_eq!(status.daily_remaining, 100_000.0 - 4200.0);
    }

    #[test]
    fn test_restore_marks_interrupted_execution_failed() {
        let h = default_harness();
        let p = create(&h, "btx-r", 100.0);
        h.manager.add_approval(&p.id, approval("origin", BotRole::Origin)).unwrap();
        h.manager.add_approval(&p.id, approval("risk", BotRole::Risk)).unwrap();
        let executing = h.manager.mark_executing(&p.id).unwrap();

        let fresh = default_harness();
        fresh.manager.restore_proposal(executing);
        let restored = fresh.manager.get_proposal(&p.id).unwrap();
        assert_eq!(restored.status, ProposalStatus::Failed);
        assert!(restored.failure_reason.is_some());

        // Failed is not reusable: the bridge tx stays guarded
        let err = fresh
            .manager
            .create_proposal("btx-r", "recipient-1", 100.0, "LUSDT", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateBridgeTransaction { .. }));
    }
}
