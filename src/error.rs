//! Error types for the vault guard

use std::time::Duration;

use thiserror::Error;

use crate::breaker::CircuitState;
use crate::proposal::ProposalStatus;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the vault guard
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Circuit breaker
    #[error("Circuit breaker {state}: proposal creation and execution are blocked")]
    CircuitOpen { state: CircuitState },

    // Request validation
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    // Spending limits
    #[error("Single transfer limit exceeded: {amount} > {limit}")]
    SingleTransferLimitExceeded { amount: f64, limit: f64 },

    #[error("Hourly limit exceeded: {spent} spent + {requested} requested > {limit}")]
    HourlyLimitExceeded { spent: f64, requested: f64, limit: f64 },

    #[error("Daily limit exceeded: {spent} spent + {requested} requested > {limit}")]
    DailyLimitExceeded { spent: f64, requested: f64, limit: f64 },

    #[error("Bridge transaction {bridge_tx_id} already has proposal {proposal_id}")]
    DuplicateBridgeTransaction {
        bridge_tx_id: String,
        proposal_id: String,
    },

    // Proposal lifecycle
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Proposal expired: {0}")]
    ProposalExpired(String),

    #[error("Bot {bot_id} already approved proposal {proposal_id}")]
    DuplicateApproval { proposal_id: String, bot_id: String },

    #[error("Invalid approval from bot {bot_id} for proposal {proposal_id}: {reason}")]
    InvalidApproval {
        proposal_id: String,
        bot_id: String,
        reason: String,
    },

    #[error("Proposal {proposal_id} is {actual}, expected {expected}")]
    InvalidTransition {
        proposal_id: String,
        actual: ProposalStatus,
        expected: ProposalStatus,
    },

    #[error("Proposal {proposal_id} is under timelock: {remaining_secs}s remaining")]
    TimelockActive {
        proposal_id: String,
        remaining_secs: u64,
    },

    #[error("Proposal {proposal_id} rejected: {}", reasons.join("; "))]
    ProposalRejected {
        proposal_id: String,
        reasons: Vec<String>,
    },

    #[error("Proposal {proposal_id} not approved: {approvals}/{required} approvals")]
    QuorumNotReached {
        proposal_id: String,
        approvals: usize,
        required: usize,
    },

    // Execution errors
    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CircuitOpen { .. }
                | Error::TimelockActive { .. }
                | Error::QuorumNotReached { .. }
                | Error::HourlyLimitExceeded { .. }
                | Error::DailyLimitExceeded { .. }
                | Error::Submission(_)
        )
    }

    /// Check if this error is a policy violation (as opposed to infrastructure failure)
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Error::CircuitOpen { .. }
                | Error::InvalidAmount(_)
                | Error::InvalidRecipient(_)
                | Error::InvalidAsset(_)
                | Error::SingleTransferLimitExceeded { .. }
                | Error::HourlyLimitExceeded { .. }
                | Error::DailyLimitExceeded { .. }
                | Error::DuplicateBridgeTransaction { .. }
                | Error::ProposalNotFound(_)
                | Error::ProposalExpired(_)
                | Error::DuplicateApproval { .. }
                | Error::InvalidApproval { .. }
                | Error::InvalidTransition { .. }
                | Error::TimelockActive { .. }
                | Error::ProposalRejected { .. }
                | Error::QuorumNotReached { .. }
        )
    }

    /// Remaining wait for a timelocked proposal
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::TimelockActive { remaining_secs, .. } => {
                Some(Duration::from_secs(*remaining_secs))
            }
            _ => None,
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
