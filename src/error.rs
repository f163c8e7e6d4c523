//! Error types for the Keystone Deployer execution core

use ethers::types::{Address, U256};
use thiserror::Error;

/// Main error type for the execution coordinator
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {message}")]
    Rpc { message: String },

    #[error(
        "Sender {sender:?} has transactions waiting for {required_confirmations} confirmations"
    )]
    WaitingForConfirmations {
        sender: Address,
        required_confirmations: u64,
    },

    #[error(
        "Nonce {nonce} of sender {sender:?} was taken by a user transaction that has fewer than {required_confirmations} confirmations"
    )]
    WaitingForNonce {
        sender: Address,
        nonce: u64,
        required_confirmations: u64,
    },

    #[error("Sender {sender:?} has insufficient funds to transfer {amount} wei")]
    InsufficientFundsForTransfer { sender: Address, amount: U256 },

    #[error("Sender {sender:?} has insufficient funds to deploy the contract")]
    InsufficientFundsForDeploy { sender: Address },

    #[error("Gas estimation failed: {message}")]
    GasEstimationFailed { message: String },

    #[error("Network switched from EIP-1559 fees to legacy gas price mid-deployment")]
    Eip1559Downgrade,

    #[error(
        "Interaction {interaction_id} already holds nonce {current}, refusing to overwrite with {requested}"
    )]
    NonceConflict {
        interaction_id: u64,
        current: u64,
        requested: u64,
    },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Execution state {0} not found")]
    ExecutionStateNotFound(String),

    #[error("Account index {index} out of range ({available} accounts configured)")]
    AccountIndexOutOfRange { index: usize, available: usize },

    #[error("No default sender configured")]
    MissingDefaultSender,
}

impl DeployerError {
    /// Check if the error is a transport-level failure the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, DeployerError::Rpc { .. })
    }

    /// Check if the error asks the caller to wait and re-run reconciliation
    pub fn is_blocking_wait(&self) -> bool {
        matches!(
            self,
            DeployerError::WaitingForConfirmations { .. }
                | DeployerError::WaitingForNonce { .. }
        )
    }
}

/// Result type for deployer operations
pub type DeployerResult<T> = Result<T, DeployerError>;
