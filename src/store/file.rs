//! JSON-file store
//!
//! Layout under the data directory:
//!
//! ```text
//! proposals/<id>.json   one file per proposal, rewritten on each save
//! spending.json         window -> counter
//! breaker.json          last breaker snapshot
//! audit.jsonl           append-only audit trail
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::audit::AuditEntry;
use crate::breaker::BreakerSnapshot;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::proposal::{Proposal, SpendingWindow};

use super::{DurableStore, SpendingCounter};

pub struct FileStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write of shared files
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("proposals"))
            .await
            .map_err(|e| Error::Store(format!("Failed to create {}: {}", root.display(), e)))?;
        debug!(path = %root.display(), "File store opened");
        Ok(Self {
            root,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    fn proposal_path(&self, proposal_id: &str) -> Result<PathBuf> {
        let safe = !proposal_id.is_empty()
            && proposal_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(Error::Store(format!("Invalid proposal id: {:?}", proposal_id)));
        }
        Ok(self.root.join("proposals").join(format!("{}.json", proposal_id)))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                Error::Store(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(format!("Failed to read {}: {}", path.display(), e))),
        }
    }

    /// Write via temp file + rename so readers never see a partial file
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Store(format!("Failed to replace {}: {}", path.display(), e)))
    }

    async fn read_counters(&self) -> Result<HashMap<SpendingWindow, SpendingCounter>> {
        Ok(self
            .read_json(&self.root.join("spending.json"))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
        let path = self.proposal_path(&proposal.id)?;
        self.write_json(&path, proposal).await
    }

    async fn load_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        let path = self.proposal_path(proposal_id)?;
        self.read_json(&path).await
    }

    async fn load_by_bridge_tx(&self, bridge_tx_id: &str) -> Result<Option<Proposal>> {
        Ok(self
            .load_proposals()
            .await?
            .into_iter()
            .filter(|p| p.bridge_tx_id == bridge_tx_id)
            .max_by_key(|p| p.created_at))
    }

    async fn load_proposals(&self) -> Result<Vec<Proposal>> {
        let dir = self.root.join("proposals");
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to list {}: {}", dir.display(), e)))?;

        let mut proposals = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Store(format!("Failed to list {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<Proposal>(&path).await {
                Ok(Some(p)) => proposals.push(p),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable proposal file"),
            }
        }
        proposals.sort_by_key(|p| p.created_at);
        Ok(proposals)
    }

    async fn incr_spending(&self, window: SpendingWindow, amount: f64) -> Result<f64> {
        let _guard = self.write_lock.lock().await;
        let mut counters = self.read_counters().await?;
        let next = SpendingCounter::incr(counters.get(&window).copied(), window, amount, self.clock.now());
        counters.insert(window, next);
        self.write_json(&self.root.join("spending.json"), &counters).await?;
        Ok(next.value)
    }

    async fn read_spending(&self, window: SpendingWindow) -> Result<f64> {
        let now = self.clock.now();
        Ok(self
            .read_counters()
            .await?
            .get(&window)
            .map(|c| c.value_at(now))
            .unwrap_or(0.0))
    }

    async fn save_breaker(&self, snapshot: &BreakerSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.root.join("breaker.json"), snapshot).await
    }

    async fn load_breaker(&self) -> Result<Option<BreakerSnapshot>> {
        self.read_json(&self.root.join("breaker.json")).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let path = self.root.join("audit.jsonl");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Store(format!("Failed to open {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Store(format!("Failed to append audit: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Store(format!("Failed to append audit: {}", e)))
    }

    async fn read_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let path = self.root.join("audit.jsonl");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("Failed to read audit: {}", e))),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(limit);
        lines[skip..]
            .iter()
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSeverity;
    use crate::breaker::CircuitState;
    use crate::clock::ManualClock;
    use crate::dev::sample_proposal;
    use crate::proposal::ProposalStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());

        let mut proposal = sample_proposal(1000.0);
        proposal.status = ProposalStatus::Executed;
        {
            let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
            store.save_proposal(&proposal).await.unwrap();
            store.incr_spending(SpendingWindow::Daily, 1000.0).await.unwrap();
            store
                .save_breaker(&BreakerSnapshot {
                    state: CircuitState::Open,
                    failures: vec![clock.now()],
                    opened_at: Some(clock.now()),
                    last_failure_at: Some(clock.now()),
                    last_success_at: None,
                })
                .await
                .unwrap();
        }

        let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();
        let loaded = store.load_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(loaded, proposal);
        assert_eq!(
            store.load_by_bridge_tx(&proposal.bridge_tx_id).await.unwrap().unwrap().id,
            proposal.id
        );
        assert_eq!(store.read_spending(SpendingWindow::Daily).await.unwrap(), 1000.0);
        assert_eq!(store.read_spending(SpendingWindow::Hourly).await.unwrap(), 0.0);
        assert_eq!(
            store.load_breaker().await.unwrap().unwrap().state,
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), Arc::new(ManualClock::starting_now()))
            .await
            .unwrap();

        assert!(store.load_proposal("nope").await.unwrap().is_none());
        assert!(store.load_breaker().await.unwrap().is_none());
        assert!(store.read_audit(10).await.unwrap().is_empty());
        assert!(store.load_proposals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_ids() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), Arc::new(ManualClock::starting_now()))
            .await
            .unwrap();
        assert!(store.load_proposal("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_audit_appends_in_order() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let store = FileStore::open(dir.path(), clock.clone()).await.unwrap();

        for event in ["a", "b", "c"] {
            store
                .append_audit(&AuditEntry::new(clock.now(), event, AuditSeverity::Info))
                .await
                .unwrap();
        }
        let tail = store.read_audit(2).await.unwrap();
        assert_eq!(
            tail.iter().map(|e| e.event.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }
}
