//! Proposal lifecycle
//!
//! Every outbound transfer becomes a proposal that collects bot verdicts
//! before it may be signed.
//!
//! ```text
//! pending --> approved --> executing --> executed
//!    |                         |
//!    +--> rejected             +--> failed
//!    +--> expired
//! ```

pub mod ledger;
pub mod manager;
pub mod types;

pub use ledger::{SpendingLedger, SpendingStatus, SpendingWindow};
pub use manager::{ProposalConfig, ProposalManager, ProposalStats};
pub use types::{
    Approval, BotRole, Proposal, ProposalStatus, Rejection, RejectionSeverity, ValidationCheck,
    ValidationResult, SOURCE_TX_KEY,
};
