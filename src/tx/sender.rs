//! Send pipeline for one on-chain interaction
//!
//! Orchestrates nonce acquisition, fee computation, gas estimation,
//! pre-send simulation, journaling and broadcast. Re-entered for the same
//! interaction only to resend after a drop (same nonce) or to bump fees;
//! a dropped transaction must never be resent under a new nonce through
//! this path. The execution engine serializes invocations per sender: no
//! two sends for one sender are ever in flight at once.

use crate::chain::{BlockTag, ChainRpc, EstimationError, NetworkFees, TransactionParams};
use crate::error::{DeployerError, DeployerResult};
use crate::simulation::{DecodeSimulation, SimulationFailure};
use crate::state::{Journal, JournalRecord, OnchainInteraction};
use crate::tx::fees::FeePolicy;
use crate::tx::nonce::NonceAllocator;

use chrono::Utc;
use ethers::types::{Address, H256, U256};
use tracing::{debug, info};

// Node error-message patterns. Nodes expose no structured codes for these
// cases; keep the strings here so updates never touch the pipeline.
const INSUFFICIENT_FUNDS_FOR_TRANSFER_PATTERN: &str = "insufficient funds for transfer";
const INSUFFICIENT_FUNDS_FOR_DEPLOY_PATTERN: &str = "contract creation code storage out of gas";

/// Result of driving one interaction through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transaction was broadcast
    Sent {
        hash: H256,
        nonce: u64,
        fees: NetworkFees,
    },
    /// Simulation decoded a failure; nothing was sent
    SimulationFailed(SimulationFailure),
}

/// Drives a single interaction from nonce to broadcast
pub struct SendPipeline {
    fee_policy: FeePolicy,
}

impl SendPipeline {
    pub fn new() -> Self {
        Self {
            fee_policy: FeePolicy::new(),
        }
    }

    pub async fn send_for(
        &self,
        rpc: &dyn ChainRpc,
        interaction: &OnchainInteraction,
        sender: Address,
        nonces: &NonceAllocator,
        decoder: &dyn DecodeSimulation,
        journal: &dyn Journal,
        future_id: &str,
    ) -> DeployerResult<SendOutcome> {
        let nonce = match interaction.nonce {
            Some(nonce) => nonce,
            None => nonces.next_nonce(rpc, sender).await?,
        };

        let fees = self.fee_policy.next_fees(rpc, interaction).await?;

        let params = TransactionParams {
            from: sender,
            to: interaction.to,
            data: interaction.data.clone(),
            value: interaction.value,
            nonce,
            fees: Some(fees),
            gas_limit: None,
        };

        let gas_limit = match rpc.estimate_gas(&params).await {
            Ok(gas) => gas,
            Err(EstimationError::Transport(e)) => return Err(e),
            Err(EstimationError::Execution(message)) => {
                debug!(
                    "Gas estimation rejected for {} (nonce {}): {}",
                    future_id, nonce, message
                );

                // Re-simulate without fees: with fees set, the node assumes
                // the block gas limit and misreports balance problems.
                let raw = rpc.call(&params.without_fees(), BlockTag::Pending).await?;
                if let Some(failure) = decoder.decode(&raw) {
                    return Ok(SendOutcome::SimulationFailed(failure));
                }

                return Err(classify_estimation_failure(
                    sender,
                    interaction.value,
                    message,
                ));
            }
        };

        let params = params.with_gas_limit(gas_limit);

        let raw = rpc.call(&params, BlockTag::Pending).await?;
        if let Some(failure) = decoder.decode(&raw) {
            return Ok(SendOutcome::SimulationFailed(failure));
        }

        // The intent must be durable before the broadcast so that a restart
        // observes the nonce reservation.
        journal
            .record(JournalRecord::TransactionPrepareSend {
                future_id: future_id.to_string(),
                interaction_id: interaction.id,
                nonce,
                recorded_at: Utc::now(),
            })
            .await?;

        let hash = rpc.send_transaction(&params).await?;
        info!(
            "Sent transaction {:?} for {} at nonce {}",
            hash, future_id, nonce
        );

        Ok(SendOutcome::Sent { hash, nonce, fees })
    }
}

impl Default for SendPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_estimation_failure(sender: Address, value: U256, message: String) -> DeployerError {
    if message.contains(INSUFFICIENT_FUNDS_FOR_TRANSFER_PATTERN) {
        DeployerError::InsufficientFundsForTransfer {
            sender,
            amount: value,
        }
    } else if message.contains(INSUFFICIENT_FUNDS_FOR_DEPLOY_PATTERN) {
        DeployerError::InsufficientFundsForDeploy { sender }
    } else {
        DeployerError::GasEstimationFailed { message }
    }
}
