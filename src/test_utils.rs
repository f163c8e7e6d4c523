//! Shared test doubles: a scripted RPC client and state builders

use crate::chain::{
    BlockSnapshot, BlockTag, ChainRpc, EstimationError, NetworkFees, RawSimulationResult,
    TransactionParams, TransactionStatus,
};
use crate::error::{DeployerError, DeployerResult};
use crate::simulation::{DecodeSimulation, SimulationFailure};
use crate::state::{
    ExecutionState, FutureKind, Journal, JournalRecord, OnchainInteraction, TransactionRecord,
};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Scripted `ChainRpc` implementation. Every call is appended to a shared
/// log so tests can assert ordering across the RPC and the journal.
/// Touching anything that was not configured fails loudly.
#[derive(Default)]
pub struct MockRpc {
    log: Arc<Mutex<Vec<String>>>,
    latest_block: StdMutex<Option<BlockSnapshot>>,
    transaction_counts: DashMap<(Address, BlockTag), u64>,
    known_transactions: DashMap<H256, ()>,
    network_fees: StdMutex<Option<NetworkFees>>,
    estimate_gas: StdMutex<Option<Result<U256, String>>>,
    call_result: StdMutex<Option<RawSimulationResult>>,
    send_result: StdMutex<Option<H256>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_block(&self, number: u64, base_fee_per_gas: Option<U256>) {
        *self.latest_block.lock().unwrap() = Some(BlockSnapshot {
            number,
            base_fee_per_gas,
        });
    }

    pub fn set_transaction_count(&self, sender: Address, tag: BlockTag, count: u64) {
        self.transaction_counts.insert((sender, tag), count);
    }

    pub fn register_transaction(&self, hash: H256) {
        self.known_transactions.insert(hash, ());
    }

    pub fn set_network_fees(&self, fees: NetworkFees) {
        *self.network_fees.lock().unwrap() = Some(fees);
    }

    /// `Err` scripts a node-side rejection carrying that message
    pub fn set_estimate_gas(&self, result: Result<U256, String>) {
        *self.estimate_gas.lock().unwrap() = Some(result);
    }

    pub fn set_call_result(&self, result: RawSimulationResult) {
        *self.call_result.lock().unwrap() = Some(result);
    }

    pub fn set_send_result(&self, hash: H256) {
        *self.send_result.lock().unwrap() = Some(hash);
    }

    /// Handle to the call log, shared with `RecordingJournal`
    pub fn shared_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub async fn log_entries(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    pub async fn calls_matching(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    async fn log(&self, entry: impl Into<String>) {
        self.log.lock().await.push(entry.into());
    }

    fn missing(what: &str) -> DeployerError {
        DeployerError::Rpc {
            message: format!("MockRpc: no {} configured", what),
        }
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn latest_block(&self) -> DeployerResult<BlockSnapshot> {
        self.log("latest_block").await;
        self.latest_block
            .lock()
            .unwrap()
            .ok_or_else(|| Self::missing("latest block"))
    }

    async fn transaction_count(&self, sender: Address, tag: BlockTag) -> DeployerResult<u64> {
        self.log(format!("transaction_count({:?})", tag)).await;
        self.transaction_counts
            .get(&(sender, tag))
            .map(|count| *count)
            .ok_or_else(|| Self::missing("transaction count"))
    }

    async fn transaction_by_hash(
        &self,
        hash: H256,
    ) -> DeployerResult<Option<TransactionStatus>> {
        self.log("transaction_by_hash").await;
        Ok(self.known_transactions.get(&hash).map(|_| TransactionStatus {
            hash,
            block_number: None,
        }))
    }

    async fn call(
        &self,
        params: &TransactionParams,
        _tag: BlockTag,
    ) -> DeployerResult<RawSimulationResult> {
        if params.fees.is_none() {
            self.log("call(no-fees)").await;
        } else {
            self.log("call").await;
        }
        self.call_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Self::missing("call result"))
    }

    async fn estimate_gas(&self, _params: &TransactionParams) -> Result<U256, EstimationError> {
        self.log("estimate_gas").await;
        match self.estimate_gas.lock().unwrap().clone() {
            Some(Ok(gas)) => Ok(gas),
            Some(Err(message)) => Err(EstimationError::Execution(message)),
            None => Err(EstimationError::Transport(Self::missing("gas estimate"))),
        }
    }

    async fn network_fees(&self) -> DeployerResult<NetworkFees> {
        self.log("network_fees").await;
        self.network_fees
            .lock()
            .unwrap()
            .ok_or_else(|| Self::missing("network fees"))
    }

    async fn send_transaction(&self, _params: &TransactionParams) -> DeployerResult<H256> {
        self.log("send_transaction").await;
        self.send_result
            .lock()
            .unwrap()
            .ok_or_else(|| Self::missing("send result"))
    }
}

/// Journal that appends into the mock's call log, for ordering assertions
pub struct RecordingJournal {
    log: Arc<Mutex<Vec<String>>>,
    records: Mutex<Vec<JournalRecord>>,
}

impl RecordingJournal {
    pub fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log,
            records: Mutex::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Journal for RecordingJournal {
    async fn record(&self, record: JournalRecord) -> DeployerResult<()> {
        self.log.lock().await.push("journal.record".to_string());
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Decoder scripted to always return the same verdict
pub struct StaticDecoder {
    failure: Option<SimulationFailure>,
}

impl StaticDecoder {
    pub fn failing(failure: SimulationFailure) -> Self {
        Self {
            failure: Some(failure),
        }
    }
}

impl DecodeSimulation for StaticDecoder {
    fn decode(&self, _raw: &RawSimulationResult) -> Option<SimulationFailure> {
        self.failure.clone()
    }
}

/// Interaction that has never been broadcast
pub fn unsent_interaction() -> OnchainInteraction {
    OnchainInteraction::new(
        1,
        Address::from([1u8; 20]),
        Some(Address::from([2u8; 20])),
        Bytes::from(vec![0xde, 0xad]),
        U256::zero(),
    )
}

/// Interaction with a nonce and one prior broadcast at the given fees
pub fn interaction_with_fees(nonce: u64, fees: NetworkFees) -> OnchainInteraction {
    let mut interaction = unsent_interaction();
    interaction.nonce = Some(nonce);
    interaction.record_transaction(TransactionRecord {
        hash: H256::from_low_u64_be(0xaa),
        fees,
    });
    interaction
}

/// Execution state for `future_id` with one broadcast interaction
pub fn exec_state_with_broadcast(
    future_id: &str,
    sender: Address,
    interaction_id: u64,
    nonce: u64,
    hash: H256,
) -> ExecutionState {
    let mut interaction = OnchainInteraction::new(
        interaction_id,
        sender,
        Some(Address::from([9u8; 20])),
        Bytes::new(),
        U256::zero(),
    );
    interaction.nonce = Some(nonce);
    interaction.record_transaction(TransactionRecord {
        hash,
        fees: NetworkFees::Legacy {
            gas_price: U256::from(1),
        },
    });

    let mut state = ExecutionState::new(future_id, FutureKind::Deployment, sender);
    state.interactions.push(interaction);
    state
}
