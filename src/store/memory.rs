//! In-process store

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::audit::AuditEntry;
use crate::breaker::BreakerSnapshot;
use crate::clock::Clock;
use crate::error::Result;
use crate::proposal::{Proposal, SpendingWindow};

use super::{DurableStore, SpendingCounter};

/// Store that lives as long as the process. Useful for tests and
/// single-shot runs where durability is not needed.
pub struct MemoryStore {
    proposals: DashMap<String, Proposal>,
    counters: DashMap<SpendingWindow, SpendingCounter>,
    breaker: Mutex<Option<BreakerSnapshot>>,
    audit: Mutex<VecDeque<AuditEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            proposals: DashMap::new(),
            counters: DashMap::new(),
            breaker: Mutex::new(None),
            audit: Mutex::new(VecDeque::new()),
            clock,
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn load_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(proposal_id).map(|p| p.value().clone()))
    }

    async fn load_by_bridge_tx(&self, bridge_tx_id: &str) -> Result<Option<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| p.bridge_tx_id == bridge_tx_id)
            .max_by_key(|p| p.created_at)
            .map(|p| p.value().clone()))
    }

    async fn load_proposals(&self) -> Result<Vec<Proposal>> {
        let mut all: Vec<Proposal> = self.proposals.iter().map(|p| p.value().clone()).collect();
        all.sort_by_key(|p| p.created_at);
        Ok(all)
    }

    async fn incr_spending(&self, window: SpendingWindow, amount: f64) -> Result<f64> {
        let now = self.clock.now();
        let mut entry = self
            .counters
            .entry(window)
            .or_insert_with(|| SpendingCounter::incr(None, window, 0.0, now));
        *entry = SpendingCounter::incr(Some(*entry), window, amount, now);
        Ok(entry.value)
    }

    async fn read_spending(&self, window: SpendingWindow) -> Result<f64> {
        let now = self.clock.now();
        Ok(self
            .counters
            .get(&window)
            .map(|c| c.value_at(now))
            .unwrap_or(0.0))
    }

    async fn save_breaker(&self, snapshot: &BreakerSnapshot) -> Result<()> {
        *self.breaker.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>> {
        Ok(self.breaker.lock().clone())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().push_back(entry.clone());
        Ok(())
    }

    async fn read_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock();
        let skip = audit.len().saturating_sub(limit);
        Ok(audit.iter().skip(skip).cloned().collect())
    }
}
