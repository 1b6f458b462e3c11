//! In-memory fact sources
//!
//! Backs all three validators with a single mutable world so the CLI can
//! run the full pipeline locally and tests can script each fact.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::bots::{BackupFacts, BridgeRecord, OriginFacts, RecipientHistory, RiskFacts};
use crate::proposal::{Proposal, ProposalStatus};

#[derive(Debug)]
struct DevState {
    recent_proposal_count: u32,
    vault_balance: f64,
    service_healthy: bool,
    database_reachable: bool,
    origin_error: Option<String>,
    risk_error: Option<String>,
    backup_error: Option<String>,
    backup_delay: Option<Duration>,
}

/// Scriptable facts for every validator
pub struct DevFacts {
    /// source tx -> (amount, finalized)
    sources: DashMap<String, (f64, bool)>,
    bridge_records: DashMap<String, BridgeRecord>,
    recipients: DashMap<String, RecipientHistory>,
    state: Mutex<DevState>,
}

impl Default for DevFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl DevFacts {
    /// Healthy bridge, empty vault, no transactions
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            bridge_records: DashMap::new(),
            recipients: DashMap::new(),
            state: Mutex::new(DevState {
                recent_proposal_count: 0,
                vault_balance: 0.0,
                service_healthy: true,
                database_reachable: true,
                origin_error: None,
                risk_error: None,
                backup_error: None,
                backup_delay: None,
            }),
        }
    }

    pub fn add_source_transaction(&self, source_tx: &str, amount: f64, finalized: bool) {
        self.sources.insert(source_tx.to_string(), (amount, finalized));
    }

    pub fn add_bridge_record(&self, bridge_tx_id: &str, amount: f64, status: &str) {
        self.bridge_records.insert(
            bridge_tx_id.to_string(),
            BridgeRecord {
                amount,
                status: status.to_string(),
            },
        );
    }

    /// Make a bridge transfer look legitimate to every validator
    pub fn register_transfer(&self, bridge_tx_id: &str, source_tx: &str, amount: f64) {
        self.add_source_transaction(source_tx, amount, true);
        self.add_bridge_record(bridge_tx_id, amount, "confirmed");
    }

    pub fn set_recipient_history(&self, recipient: &str, history: RecipientHistory) {
        self.recipients.insert(recipient.to_string(), history);
    }

    pub fn set_recent_proposal_count(&self, count: u32) {
        self.state.lock().recent_proposal_count = count;
    }

    pub fn set_vault_balance(&self, balance: f64) {
        self.state.lock().vault_balance = balance;
    }

    pub fn set_service_healthy(&self, healthy: bool) {
        self.state.lock().service_healthy = healthy;
    }

    pub fn set_database_reachable(&self, reachable: bool) {
        self.state.lock().database_reachable = reachable;
    }

    pub fn fail_origin(&self, message: &str) {
        self.state.lock().origin_error = Some(message.to_string());
    }

    pub fn fail_risk(&self, message: &str) {
        self.state.lock().risk_error = Some(message.to_string());
    }

    pub fn fail_backup(&self, message: &str) {
        self.state.lock().backup_error = Some(message.to_string());
    }

    /// Delay every backup fact lookup
    pub fn set_backup_delay(&self, delay: Duration) {
        self.state.lock().backup_delay = Some(delay);
    }

    fn check(error: &Option<String>) -> anyhow::Result<()> {
        match error {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OriginFacts for DevFacts {
    async fn is_source_transaction_finalized(&self, source_tx: &str) -> anyhow::Result<bool> {
        Self::check(&self.state.lock().origin_error)?;
        Ok(self.sources.get(source_tx).map(|s| s.1).unwrap_or(false))
    }

    async fn get_source_transaction_amount(&self, source_tx: &str) -> anyhow::Result<Option<f64>> {
        Self::check(&self.state.lock().origin_error)?;
        Ok(self.sources.get(source_tx).map(|s| s.0))
    }
}

#[async_trait]
impl RiskFacts for DevFacts {
    async fn get_recent_proposal_count(&self, _window_minutes: u64) -> anyhow::Result<u32> {
        let state = self.state.lock();
        Self::check(&state.risk_error)?;
        Ok(state.recent_proposal_count)
    }

    async fn get_recipient_history(&self, recipient: &str) -> anyhow::Result<RecipientHistory> {
        Self::check(&self.state.lock().risk_error)?;
        Ok(self
            .recipients
            .get(recipient)
            .map(|h| *h)
            .unwrap_or_default())
    }

    async fn get_vault_balance(&self) -> anyhow::Result<f64> {
        let state = self.state.lock();
        Self::check(&state.risk_error)?;
        Ok(state.vault_balance)
    }
}

impl DevFacts {
    async fn backup_gate(&self) -> anyhow::Result<()> {
        let (error, delay) = {
            let state = self.state.lock();
            (state.backup_error.clone(), state.backup_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::check(&error)
    }
}

#[async_trait]
impl BackupFacts for DevFacts {
    async fn is_bridge_service_healthy(&self) -> anyhow::Result<bool> {
        self.backup_gate().await?;
        Ok(self.state.lock().service_healthy)
    }

    async fn is_database_reachable(&self) -> anyhow::Result<bool> {
        self.backup_gate().await?;
        Ok(self.state.lock().database_reachable)
    }

    async fn get_proposal_from_database(
        &self,
        bridge_tx_id: &str,
    ) -> anyhow::Result<Option<BridgeRecord>> {
        self.backup_gate().await?;
        Ok(self.bridge_records.get(bridge_tx_id).map(|r| r.value().clone()))
    }
}

/// Detached pending proposal for validator tests
pub fn sample_proposal(amount: f64) -> Proposal {
    let now = Utc::now();
    Proposal {
        id: uuid::Uuid::new_v4().to_string(),
        bridge_tx_id: format!("btx-{}", uuid::Uuid::new_v4().simple()),
        recipient: "5Gw3s7q4QLkSWwknsiPtjujPv3XM4Trxi5d4PgKMMk3gfGTE".to_string(),
        amount,
        asset: "LUSDT".to_string(),
        created_at: now,
        updated_at: now,
        expires_at: now + chrono::Duration::minutes(5),
        timelock_until: None,
        status: ProposalStatus::Pending,
        approvals: Vec::new(),
        rejections: Vec::new(),
        required_approvals: 2,
        total_bots: 3,
        execution_signature: None,
        failure_reason: None,
        metadata: BTreeMap::new(),
    }
}
