//! Deployment execution state tracked across restarts

use crate::chain::NetworkFees;
use crate::error::{DeployerError, DeployerResult};

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of one future's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Started,
    Running,
    Success,
    Timeout,
    Failure,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Timeout | ExecutionStatus::Failure
        )
    }
}

/// The kind of future an execution state drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FutureKind {
    Deployment,
    Call,
    Send,
    StaticCall,
    ReadEventArgument,
    ContractAt,
    EncodeFunctionCall,
}

impl FutureKind {
    /// Whether executions of this kind broadcast transactions and therefore
    /// hold nonces. Static calls run `eth_call` only; the last three never
    /// touch the network.
    pub fn produces_transactions(&self) -> bool {
        matches!(
            self,
            FutureKind::Deployment | FutureKind::Call | FutureKind::Send
        )
    }
}

/// One broadcast attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: H256,
    pub fees: NetworkFees,
}

/// A logical on-chain action whose identity persists across broadcast
/// attempts. The nonce is set by the first send and immutable afterwards;
/// every appended transaction replaces the previous one at the same nonce
/// with strictly higher fees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainInteraction {
    pub id: u64,
    pub from: Address,
    /// `None` means contract creation
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub nonce: Option<u64>,
    pub transactions: Vec<TransactionRecord>,
}

impl OnchainInteraction {
    pub fn new(id: u64, from: Address, to: Option<Address>, data: Bytes, value: U256) -> Self {
        Self {
            id,
            from,
            to,
            data,
            value,
            nonce: None,
            transactions: Vec::new(),
        }
    }

    /// Write-once nonce assignment
    pub fn set_nonce(&mut self, nonce: u64) -> DeployerResult<()> {
        match self.nonce {
            None => {
                self.nonce = Some(nonce);
                Ok(())
            }
            Some(current) if current == nonce => Ok(()),
            Some(current) => Err(DeployerError::NonceConflict {
                interaction_id: self.id,
                current,
                requested: nonce,
            }),
        }
    }

    pub fn record_transaction(&mut self, record: TransactionRecord) {
        self.transactions.push(record);
    }

    /// Fees of the most recent broadcast, if any
    pub fn latest_fees(&self) -> Option<&NetworkFees> {
        self.transactions.last().map(|tx| &tx.fees)
    }

    pub fn transaction_hashes(&self) -> Vec<H256> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }
}

/// One future's execution, carrying its network interactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: String,
    pub kind: FutureKind,
    pub status: ExecutionStatus,
    pub from: Address,
    pub interactions: Vec<OnchainInteraction>,
}

impl ExecutionState {
    pub fn new(id: impl Into<String>, kind: FutureKind, from: Address) -> Self {
        Self {
            id: id.into(),
            kind,
            status: ExecutionStatus::Started,
            from,
            interactions: Vec::new(),
        }
    }

    /// The interaction currently being driven to completion: the most
    /// recent one, as long as this execution has not succeeded
    pub fn pending_interaction(&self) -> Option<&OnchainInteraction> {
        if self.status == ExecutionStatus::Success {
            return None;
        }
        self.interactions.last()
    }

    pub fn interaction_mut(&mut self, interaction_id: u64) -> Option<&mut OnchainInteraction> {
        self.interactions
            .iter_mut()
            .find(|ni| ni.id == interaction_id)
    }
}

/// All execution states of one deployment, keyed by future id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentState {
    states: HashMap<String, ExecutionState>,
}

impl DeploymentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: ExecutionState) {
        self.states.insert(state.id.clone(), state);
    }

    pub fn get(&self, id: &str) -> Option<&ExecutionState> {
        self.states.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ExecutionState> {
        self.states.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionState> {
        self.states.values()
    }

    /// All of our transactions for a nonce are gone and nothing took the
    /// nonce: forget the broadcasts, keep the nonce, the caller resends.
    pub fn mark_interaction_dropped(
        &mut self,
        future_id: &str,
        interaction_id: u64,
    ) -> DeployerResult<()> {
        let interaction = self.interaction_checked(future_id, interaction_id)?;
        interaction.transactions.clear();
        Ok(())
    }

    /// A user transaction consumed the nonce: retire the interaction so the
    /// next send allocates a fresh nonce.
    pub fn mark_interaction_replaced(
        &mut self,
        future_id: &str,
        interaction_id: u64,
    ) -> DeployerResult<()> {
        let interaction = self.interaction_checked(future_id, interaction_id)?;
        interaction.transactions.clear();
        interaction.nonce = None;
        Ok(())
    }

    fn interaction_checked(
        &mut self,
        future_id: &str,
        interaction_id: u64,
    ) -> DeployerResult<&mut OnchainInteraction> {
        self.states
            .get_mut(future_id)
            .ok_or_else(|| DeployerError::ExecutionStateNotFound(future_id.to_string()))?
            .interaction_mut(interaction_id)
            .ok_or_else(|| {
                DeployerError::ExecutionStateNotFound(format!(
                    "{}/interaction {}",
                    future_id, interaction_id
                ))
            })
    }
}
