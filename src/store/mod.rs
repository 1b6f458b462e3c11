//! Durable state
//!
//! Restart safety for proposals, spending counters, breaker state and the
//! audit trail. The in-memory core is authoritative within a process; the
//! store only lets a restarted process pick up where the last one stopped.

pub mod file;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::breaker::BreakerSnapshot;
use crate::clock::Clock;
use crate::error::Result;
use crate::proposal::{Proposal, SpendingWindow};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Save/load contract for restart-safe state
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save_proposal(&self, proposal: &Proposal) -> Result<()>;

    async fn load_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>>;

    /// Most recent proposal for a bridge transaction
    async fn load_by_bridge_tx(&self, bridge_tx_id: &str) -> Result<Option<Proposal>>;

    async fn load_proposals(&self) -> Result<Vec<Proposal>>;

    /// Add to a window counter, starting a fresh counter when the previous
    /// one has expired. Returns the new total.
    async fn incr_spending(&self, window: SpendingWindow, amount: f64) -> Result<f64>;

    /// Current counter value; zero once expired
    async fn read_spending(&self, window: SpendingWindow) -> Result<f64>;

    async fn save_breaker(&self, snapshot: &BreakerSnapshot) -> Result<()>;

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Last `limit` entries, oldest first
    async fn read_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Counter with TTL-based reset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpendingCounter {
    pub value: f64,
    pub expires_at: DateTime<Utc>,
}

impl SpendingCounter {
    fn fresh(window: SpendingWindow, now: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            expires_at: now + window.duration(),
        }
    }

    /// Live value at `now`
    pub fn value_at(&self, now: DateTime<Utc>) -> f64 {
        if now >= self.expires_at {
            0.0
        } else {
            self.value
        }
    }

    /// Add `amount`, resetting first if expired
    pub fn incr(current: Option<Self>, window: SpendingWindow, amount: f64, now: DateTime<Utc>) -> Self {
        let mut counter = match current {
            Some(c) if now < c.expires_at => c,
            _ => Self::fresh(window, now),
        };
        counter.value += amount;
        counter
    }
}

/// Which store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::File => write!(f, "file"),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Data directory for the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf { PathBuf::from("data/vault-guard") }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

/// Build the configured store
pub async fn open(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn DurableStore>> {
    let store: Arc<dyn DurableStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(clock)),
        StoreBackend::File => Arc::new(FileStore::open(&config.path, clock).await?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_counter_resets_after_ttl() {
        let now = Utc::now();
        let c = SpendingCounter::incr(None, SpendingWindow::Hourly, 100.0, now);
        let c = SpendingCounter::incr(Some(c), SpendingWindow::Hourly, 50.0, now);
        assert_eq!(c.value_at(now), 150.0);

        let later = now + Duration::minutes(61);
        assert_eq!(c.value_at(later), 0.0);
        let c = SpendingCounter::incr(Some(c), SpendingWindow::Hourly, 10.0, later);
        assert_eq!(c.value, 10.0);
        assert_eq!(c.expires_at, later + Duration::hours(1));
    }
}
