//! Deployment state tracking and crash-recovery journaling
//!
//! Handles:
//! - Per-future execution state and on-chain interaction records
//! - Write-once nonce reservations
//! - Append-only journal for pre-broadcast intent

pub mod journal;
pub mod model;

pub use journal::{FileJournal, Journal, JournalRecord, MemoryJournal};
pub use model::{
    DeploymentState, ExecutionState, ExecutionStatus, FutureKind, OnchainInteraction,
    TransactionRecord,
};
