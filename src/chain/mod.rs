//! Chain module - typed JSON-RPC access to the deployment target
//!
//! Provides:
//! - Multi-RPC provider management with automatic failover for reads
//! - Block, transaction-count and mempool queries at explicit block tags
//! - Gas estimation, pre-send simulation and broadcast

pub mod provider;

pub use provider::{
    BlockSnapshot, BlockTag, ChainClient, ChainRpc, EstimationError, NetworkFees,
    RawSimulationResult, TransactionParams, TransactionStatus,
};
