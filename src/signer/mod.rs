//! Transaction signing
//!
//! The executor never holds key material. It hands a [`TransferTransaction`]
//! to a [`TransactionSigner`] and gets back a [`SignedTransfer`]; whether the
//! key lives in memory, a KMS or an HSM is the backend's business.

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::proposal::Proposal;

pub use local::LocalSigner;

/// Unsigned outbound transfer built from an executing proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTransaction {
    pub proposal_id: String,
    pub bridge_tx_id: String,
    /// Vault public key (base58)
    pub from: String,
    pub recipient: String,
    pub amount: f64,
    pub asset: String,
    pub created_at: DateTime<Utc>,
}

impl TransferTransaction {
    pub fn from_proposal(proposal: &Proposal, from: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            proposal_id: proposal.id.clone(),
            bridge_tx_id: proposal.bridge_tx_id.clone(),
            from: from.into(),
            recipient: proposal.recipient.clone(),
            amount: proposal.amount,
            asset: proposal.asset.clone(),
            created_at: now,
        }
    }

    /// Canonical bytes covered by the signature
    pub fn message(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }
}

/// A transfer plus the signer's signature over [`TransferTransaction::message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub transaction: TransferTransaction,
    /// Signature (base58)
    pub signature: String,
    /// Signer public key (base58)
    pub signer: String,
}

/// Signing backend
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Backend name for logs ("local", "kms", ...)
    fn backend(&self) -> &str;

    /// Public key (base58)
    async fn public_key(&self) -> Result<String>;

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    async fn sign_transaction(&self, transaction: TransferTransaction) -> Result<SignedTransfer> {
        let message = transaction.message()?;
        let signature = self.sign(&message).await?;
        Ok(SignedTransfer {
            signature: bs58::encode(signature).into_string(),
            signer: self.public_key().await?,
            transaction,
        })
    }
}
