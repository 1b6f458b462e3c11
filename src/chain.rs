//! Chain submission seam
//!
//! Broadcasting a signed transfer is chain-specific and lives behind
//! [`ChainSubmitter`].

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::signer::SignedTransfer;

/// Broadcasts a signed transfer and returns the on-chain signature
#[async_trait]
pub trait ChainSubmitter: Send + Sync {
    async fn submit(&self, transfer: &SignedTransfer) -> Result<String>;
}

/// Accepts every transfer without broadcasting it
#[derive(Debug, Default, Clone)]
pub struct DryRunSubmitter;

#[async_trait]
impl ChainSubmitter for DryRunSubmitter {
    async fn submit(&self, transfer: &SignedTransfer) -> Result<String> {
        info!(
            proposal_id = %transfer.transaction.proposal_id,
            recipient = %transfer.transaction.recipient,
            amount = transfer.transaction.amount,
            "[DRY RUN] Transfer not broadcast"
        );
        Ok(transfer.signature.clone())
    }
}
