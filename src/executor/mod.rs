//! Vault executor
//!
//! Entry point for outbound transfers. A request becomes a proposal, every
//! bot evaluates it concurrently, the verdicts go back to the proposal
//! manager, and only a proposal that reached quorum with no veto and no
//! running timelock is signed and submitted.
//!
//! # Flow
//!
//! ```text
//! request_transfer
//!   -> ProposalManager::create_proposal
//!   -> bots (concurrent, per-bot timeout)
//!   -> add_rejection* / add_approval*
//!   -> mark_executing -> signer -> chain -> mark_executed | mark_failed
//! ```

mod sweep;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditSeverity};
use crate::bots::{ApprovalBot, BotVerdict};
use crate::chain::ChainSubmitter;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::proposal::{
    Proposal, ProposalManager, ProposalStatus, RejectionSeverity, SpendingWindow, SOURCE_TX_KEY,
};
use crate::signer::{TransactionSigner, TransferTransaction};
use crate::store::DurableStore;

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on a single bot evaluation
    #[serde(default = "default_bot_timeout_ms")]
    pub bot_timeout_ms: u64,

    /// Background cleanup / ready-queue interval
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Asset released by this vault
    #[serde(default = "default_asset")]
    pub asset: String,
}

fn default_bot_timeout_ms() -> u64 { 10_000 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_asset() -> String { "LUSDT".to_string() }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            bot_timeout_ms: default_bot_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            asset: default_asset(),
        }
    }
}

/// A transfer request as received from the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub bridge_tx_id: String,
    pub recipient: String,
    pub amount: f64,
    /// Source-chain transaction backing the release
    #[serde(default)]
    pub source_tx: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TransferRequest {
    fn into_metadata(self) -> BTreeMap<String, String> {
        let mut metadata = self.metadata;
        if let Some(source_tx) = self.source_tx {
            metadata.insert(SOURCE_TX_KEY.to_string(), source_tx);
        }
        metadata
    }
}

/// Orchestrates proposal, quorum and signing
pub struct VaultExecutor {
    manager: Arc<ProposalManager>,
    bots: Vec<Arc<dyn ApprovalBot>>,
    signer: Arc<dyn TransactionSigner>,
    chain: Arc<dyn ChainSubmitter>,
    store: Option<Arc<dyn DurableStore>>,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
}

impl VaultExecutor {
    /// Build an executor; the bot set must match the manager's bot count
    pub fn new(
        manager: Arc<ProposalManager>,
        bots: Vec<Arc<dyn ApprovalBot>>,
        signer: Arc<dyn TransactionSigner>,
        chain: Arc<dyn ChainSubmitter>,
        config: ExecutorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if bots.len() != manager.total_bots() {
            return Err(Error::Config(format!(
                "executor has {} bots but proposals expect {}",
                bots.len(),
                manager.total_bots()
            )));
        }
        let mut ids = HashSet::new();
        for bot in &bots {
            if !ids.insert(bot.id().to_string()) {
                return Err(Error::Config(format!("duplicate bot id: {}", bot.id())));
            }
        }

        Ok(Self {
            manager,
            bots,
            signer,
            chain,
            store: None,
            config,
            clock,
        })
    }

    /// Persist state to a durable store
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn manager(&self) -> &Arc<ProposalManager> {
        &self.manager
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a bridge request through the full pipeline
    pub async fn submit(&self, request: TransferRequest) -> Result<String> {
        let bridge_tx_id = request.bridge_tx_id.clone();
        let recipient = request.recipient.clone();
        let amount = request.amount;
        self.request_transfer(&bridge_tx_id, &recipient, amount, request.into_metadata())
            .await
    }

    /// Validate, approve and execute a transfer; returns the on-chain signature
    pub async fn request_transfer(
        &self,
        bridge_tx_id: &str,
        recipient: &str,
        amount: f64,
        metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        // A repeat of a request that was told to wait out its timelock
        if let Some(existing) =
            self.manager
                .find_resumable(bridge_tx_id, recipient, amount, &self.config.asset)
        {
            info!(
                proposal_id = %existing.id,
                bridge_tx_id = %bridge_tx_id,
                "Resuming approved proposal"
            );
            return self.execute(&existing.id).await;
        }

        let proposal = match self.manager.create_proposal(
            bridge_tx_id,
            recipient,
            amount,
            &self.config.asset,
            metadata,
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!(bridge_tx_id = %bridge_tx_id, error = %e, "Transfer request refused");
                self.record_outcome(
                    AuditEntry::new(self.clock.now(), "transfer_refused", AuditSeverity::Warning)
                        .with_detail("bridge_tx_id", bridge_tx_id)
                        .with_detail("error", e.to_string()),
                )
                .await;
                return Err(e);
            }
        };
        self.persist(&proposal).await;

        let verdicts = self.collect_verdicts(&proposal).await;
        self.apply_verdicts(&proposal.id, verdicts).await;

        let current = self
            .manager
            .get_proposal(&proposal.id)
            .ok_or_else(|| Error::ProposalNotFound(proposal.id.clone()))?;

        match current.status {
            ProposalStatus::Approved => {}
            ProposalStatus::Rejected => {
                let reasons: Vec<String> = current
                    .rejections
                    .iter()
                    .map(|r| format!("{} ({}): {}", r.bot_id, r.severity, r.reason))
                    .collect();
                self.record_outcome(
                    AuditEntry::new(self.clock.now(), "transfer_rejected", AuditSeverity::Warning)
                        .with_proposal(current.id.clone())
                        .with_detail("reasons", reasons.clone()),
                )
                .await;
                return Err(Error::ProposalRejected {
                    proposal_id: current.id,
                    reasons,
                });
            }
            ProposalStatus::Expired => return Err(Error::ProposalExpired(current.id)),
            _ => {
                return Err(Error::QuorumNotReached {
                    approvals: current.approval_count(),
                    required: current.required_approvals,
                    proposal_id: current.id,
                })
            }
        }

        if let Some(remaining) = current.timelock_remaining(self.clock.now()) {
            let remaining_secs = ((remaining.num_milliseconds() + 999) / 1000) as u64;
            info!(
                proposal_id = %current.id,
                remaining_secs,
                "Proposal approved, waiting for timelock"
            );
            return Err(Error::TimelockActive {
                proposal_id: current.id,
                remaining_secs,
            });
        }

        self.execute(&current.id).await
    }

    /// Execute an approved proposal whose timelock has elapsed
    pub async fn execute_approved(&self, proposal_id: &str) -> Result<String> {
        info!(proposal_id = %proposal_id, "Executing approved proposal");
        self.execute(proposal_id).await
    }

    /// Execute every ready proposal, oldest first
    pub async fn process_ready_queue(&self) -> Vec<(String, Result<String>)> {
        let ready = self.manager.get_ready_to_execute();
        let mut results = Vec::with_capacity(ready.len());
        for proposal in ready {
            let result = self.execute(&proposal.id).await;
            if let Err(e) = &result {
                warn!(proposal_id = %proposal.id, error = %e, "Queued execution did not complete");
            }
            results.push((proposal.id, result));
        }
        results
    }

    /// Run every bot concurrently and turn each outcome into a verdict
    async fn collect_verdicts(&self, proposal: &Proposal) -> Vec<BotVerdict> {
        let timeout = Duration::from_millis(self.config.bot_timeout_ms);
        let handles: Vec<_> = self
            .bots
            .iter()
            .map(|bot| {
                let bot = Arc::clone(bot);
                let proposal = proposal.clone();
                tokio::spawn(async move { tokio::time::timeout(timeout, bot.evaluate(&proposal)).await })
            })
            .collect();

        let outcomes = futures::future::join_all(handles).await;
        let now = self.clock.now();

        self.bots
            .iter()
            .zip(outcomes)
            .map(|(bot, outcome)| match outcome {
                Ok(Ok(verdict)) => self.check_verdict(bot.as_ref(), proposal, verdict),
                Ok(Err(_)) => {
                    warn!(
                        proposal_id = %proposal.id,
                        bot = %bot.id(),
                        timeout_ms = self.config.bot_timeout_ms,
                        "Bot evaluation timed out"
                    );
                    bot.identity().failure_verdict(
                        format!("evaluation timed out after {}ms", self.config.bot_timeout_ms),
                        RejectionSeverity::Warning,
                        now,
                    )
                }
                Err(join_error) => {
                    error!(
                        proposal_id = %proposal.id,
                        bot = %bot.id(),
                        error = %join_error,
                        "Bot evaluation aborted"
                    );
                    bot.identity().failure_verdict(
                        format!("evaluation aborted: {}", join_error),
                        RejectionSeverity::Critical,
                        now,
                    )
                }
            })
            .collect()
    }

    /// Only verdicts attributable to the bot that returned them count
    fn check_verdict(&self, bot: &dyn ApprovalBot, proposal: &Proposal, verdict: BotVerdict) -> BotVerdict {
        let genuine = match &verdict {
            BotVerdict::Approve(approval) => bot.verify(proposal, approval),
            BotVerdict::Reject(rejection) => rejection.bot_id == bot.id(),
        };
        if genuine {
            return verdict;
        }

        error!(
            proposal_id = %proposal.id,
            bot = %bot.id(),
            claimed = %verdict.bot_id(),
            "Bot returned an unverifiable verdict"
        );
        bot.identity().failure_verdict(
            "approval signature did not verify",
            RejectionSeverity::Critical,
            self.clock.now(),
        )
    }

    /// Feed verdicts to the manager, rejections first so any dissent vetoes
    async fn apply_verdicts(&self, proposal_id: &str, verdicts: Vec<BotVerdict>) {
        let (rejections, approvals): (Vec<_>, Vec<_>) =
            verdicts.into_iter().partition(|v| !v.is_approval());
        let breaker_affected = rejections.iter().any(|v| {
            matches!(v, BotVerdict::Reject(r) if r.severity == RejectionSeverity::Critical)
        });

        for verdict in rejections.into_iter().chain(approvals) {
            let bot_id = verdict.bot_id().to_string();
            let applied = match verdict {
                BotVerdict::Reject(rejection) => self.manager.add_rejection(proposal_id, rejection),
                BotVerdict::Approve(approval) => self.manager.add_approval(proposal_id, approval),
            };
            match applied {
                Ok(updated) => self.persist(&updated).await,
                Err(e) => debug!(
                    proposal_id = %proposal_id,
                    bot = %bot_id,
                    error = %e,
                    "Verdict not applied"
                ),
            }
        }

        if breaker_affected {
            self.persist_breaker().await;
        }
    }

    async fn execute(&self, proposal_id: &str) -> Result<String> {
        let proposal = self.manager.mark_executing(proposal_id)?;
        self.persist(&proposal).await;

        match self.sign_and_submit(&proposal).await {
            Ok(signature) => {
                let executed = self.manager.mark_executed(proposal_id, &signature)?;
                self.persist(&executed).await;
                self.persist_spending(executed.amount).await;
                self.persist_breaker().await;
                self.record_outcome(
                    AuditEntry::new(self.clock.now(), "transfer_executed", AuditSeverity::Info)
                        .with_proposal(proposal_id)
                        .with_detail("signature", signature.clone())
                        .with_detail("amount", executed.amount),
                )
                .await;
                Ok(signature)
            }
            Err(e) => {
                error!(proposal_id = %proposal_id, error = %e, "Transfer execution failed");
                match self.manager.mark_failed(proposal_id, &e.to_string()) {
                    Ok(failed) => self.persist(&failed).await,
                    Err(mark_err) => {
                        error!(proposal_id = %proposal_id, error = %mark_err, "Could not mark proposal failed")
                    }
                }
                self.persist_breaker().await;
                self.record_outcome(
                    AuditEntry::new(self.clock.now(), "transfer_failed", AuditSeverity::Critical)
                        .with_proposal(proposal_id)
                        .with_detail("error", e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn sign_and_submit(&self, proposal: &Proposal) -> Result<String> {
        let vault = self.signer.public_key().await?;
        let transaction = TransferTransaction::from_proposal(proposal, vault, self.clock.now());
        debug!(
            proposal_id = %proposal.id,
            backend = %self.signer.backend(),
            "Signing transfer"
        );
        let signed = self.signer.sign_transaction(transaction).await?;
        self.chain.submit(&signed).await
    }

    /// Reload breaker state, spending totals and proposals from the store
    ///
    /// Returns the number of proposals restored.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        if let Some(snapshot) = store.load_breaker().await? {
            info!(state = %snapshot.state, "Restoring circuit breaker");
            self.manager.breaker().restore(snapshot);
        }

        for window in [SpendingWindow::Hourly, SpendingWindow::Daily] {
            let spent = store.read_spending(window).await?;
            if spent > 0.0 {
                self.manager.restore_spending(window, spent);
            }
        }

        let proposals = store.load_proposals().await?;
        let count = proposals.len();
        for proposal in proposals {
            let id = proposal.id.clone();
            let was_executing = proposal.status == ProposalStatus::Executing;
            self.manager.restore_proposal(proposal);
            if was_executing {
                if let Some(p) = self.manager.get_proposal(&id) {
                    self.persist(&p).await;
                }
            }
        }

        info!(proposals = count, "State restored from store");
        Ok(count)
    }

    async fn persist(&self, proposal: &Proposal) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_proposal(proposal).await {
                warn!(proposal_id = %proposal.id, error = %e, "Failed to persist proposal");
            }
        }
    }

    async fn persist_breaker(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_breaker(&self.manager.breaker().snapshot()).await {
                warn!(error = %e, "Failed to persist breaker state");
            }
        }
    }

    async fn persist_spending(&self, amount: f64) {
        if let Some(store) = &self.store {
            for window in [SpendingWindow::Hourly, SpendingWindow::Daily] {
                if let Err(e) = store.incr_spending(window, amount).await {
                    warn!(window = %window, error = %e, "Failed to persist spending");
                }
            }
        }
    }

    async fn record_outcome(&self, entry: AuditEntry) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_audit(&entry).await {
                warn!(event = %entry.event, error = %e, "Failed to persist audit entry");
            }
        }
    }
}
