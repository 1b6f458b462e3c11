//! Bridge Vault Guard Library
//!
//! Quorum-gated execution of bridge vault releases: every outbound transfer
//! becomes a proposal that independent validator bots must approve before
//! the vault key signs anything.

pub mod audit;
pub mod bots;
pub mod breaker;
pub mod chain;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dev;
pub mod error;
pub mod executor;
pub mod proposal;
pub mod signer;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use executor::{TransferRequest, VaultExecutor};
pub use proposal::{Proposal, ProposalManager, ProposalStatus};
