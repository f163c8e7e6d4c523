//! Keystone Deployer - on-chain execution coordination for declarative
//! smart-contract deployments
//!
//! This crate drives each deployment step to completion against a remote
//! node: it allocates nonces, computes (and bumps) fees, simulates before
//! sending, journals intent for crash recovery, and reconciles locally
//! tracked nonces with what the network actually observed.

pub mod chain;
pub mod config;
pub mod error;
pub mod plan;
pub mod simulation;
pub mod state;
pub mod tx;

#[cfg(test)]
pub mod test_utils;

pub use chain::{BlockTag, ChainClient, ChainRpc, NetworkFees, RawSimulationResult};
pub use config::ExecutorSettings;
pub use error::{DeployerError, DeployerResult};
pub use plan::{ModulePlan, PlannedFuture, SenderDescriptor};
pub use simulation::{DecodeSimulation, NoopDecoder, SimulationFailure};
pub use state::{
    DeploymentState, ExecutionState, ExecutionStatus, FileJournal, FutureKind, Journal,
    JournalRecord, MemoryJournal, OnchainInteraction, TransactionRecord,
};
pub use tx::{
    NonceAllocator, NonceReconciler, ReconcileEvent, SendOutcome, SendPipeline,
};
