//! Chain client with multi-RPC support and automatic failover
//!
//! Thin typed wrapper over JSON-RPC. Signing is the node's concern
//! (`eth_sendTransaction`); the client never holds key material.

use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, H256,
    U256, U64,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default priority fee when the node does not answer `eth_maxPriorityFeePerGas`
const FALLBACK_PRIORITY_FEE_WEI: u64 = 1_000_000_000;

/// Block tag for count and call queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Pending,
    Number(u64),
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockId::Number(BlockNumber::Latest),
            BlockTag::Pending => BlockId::Number(BlockNumber::Pending),
            BlockTag::Number(n) => BlockId::Number(BlockNumber::Number(U64::from(n))),
        }
    }
}

/// Fee fields for the next transaction of an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFees {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl NetworkFees {
    /// Scale every fee field to `percent`% of its current value,
    /// rounded down by integer division
    pub fn scaled(&self, percent: u64) -> Self {
        match *self {
            NetworkFees::Legacy { gas_price } => NetworkFees::Legacy {
                gas_price: gas_price * percent / 100,
            },
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => NetworkFees::Eip1559 {
                max_fee_per_gas: max_fee_per_gas * percent / 100,
                max_priority_fee_per_gas: max_priority_fee_per_gas * percent / 100,
            },
        }
    }

    /// Field-wise maximum of two same-variant fee values.
    /// Returns `None` when the variants differ; cross-variant handling is
    /// the fee policy's decision.
    pub fn field_max(&self, other: &NetworkFees) -> Option<NetworkFees> {
        match (*self, *other) {
            (NetworkFees::Legacy { gas_price: a }, NetworkFees::Legacy { gas_price: b }) => {
                Some(NetworkFees::Legacy {
                    gas_price: a.max(b),
                })
            }
            (
                NetworkFees::Eip1559 {
                    max_fee_per_gas: fa,
                    max_priority_fee_per_gas: pa,
                },
                NetworkFees::Eip1559 {
                    max_fee_per_gas: fb,
                    max_priority_fee_per_gas: pb,
                },
            ) => Some(NetworkFees::Eip1559 {
                max_fee_per_gas: fa.max(fb),
                max_priority_fee_per_gas: pa.max(pb),
            }),
            _ => None,
        }
    }
}

/// Parameters for estimation, simulation and broadcast.
///
/// `fees: None` means "estimate without fee constraints"; nodes otherwise
/// assume the block gas limit and misreport balance problems.
#[derive(Debug, Clone)]
pub struct TransactionParams {
    pub from: Address,
    /// `None` means contract creation
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub fees: Option<NetworkFees>,
    pub gas_limit: Option<U256>,
}

impl TransactionParams {
    /// Copy of these params with the fee fields removed
    pub fn without_fees(&self) -> Self {
        Self {
            fees: None,
            ..self.clone()
        }
    }

    /// Copy of these params with a gas limit set
    pub fn with_gas_limit(&self, gas_limit: U256) -> Self {
        Self {
            gas_limit: Some(gas_limit),
            ..self.clone()
        }
    }

    /// Build the wire transaction. The fee variant picks the envelope type;
    /// fee-less params become a legacy request with no price fields.
    pub fn to_typed_transaction(&self) -> TypedTransaction {
        match self.fees {
            Some(NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.from)
                    .data(self.data.clone())
                    .value(self.value)
                    .nonce(self.nonce)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                TypedTransaction::Eip1559(tx)
            }
            Some(NetworkFees::Legacy { gas_price }) => {
                let mut tx = self.base_legacy_request().gas_price(gas_price);
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                TypedTransaction::Legacy(tx)
            }
            None => {
                let mut tx = self.base_legacy_request();
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                TypedTransaction::Legacy(tx)
            }
        }
    }

    fn base_legacy_request(&self) -> TransactionRequest {
        let mut tx = TransactionRequest::new()
            .from(self.from)
            .data(self.data.clone())
            .value(self.value)
            .nonce(self.nonce);
        if let Some(to) = self.to {
            tx = tx.to(to);
        }
        tx
    }
}

/// Latest-block fields the core needs
#[derive(Debug, Clone, Copy)]
pub struct BlockSnapshot {
    pub number: u64,
    pub base_fee_per_gas: Option<U256>,
}

/// Minimal view of a transaction the node still knows about
#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub hash: H256,
    /// `None` while the transaction sits in the mempool
    pub block_number: Option<u64>,
}

/// Outcome of an `eth_call`: opaque bytes plus a success/revert flag.
/// Decoding is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct RawSimulationResult {
    pub success: bool,
    pub return_data: Bytes,
}

impl RawSimulationResult {
    pub fn success(return_data: Bytes) -> Self {
        Self {
            success: true,
            return_data,
        }
    }

    pub fn reverted(return_data: Bytes) -> Self {
        Self {
            success: false,
            return_data,
        }
    }
}

/// Gas estimation failure, split so the pipeline can tell a node-side
/// rejection (revert, balance) from a transport problem
#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    #[error("node rejected gas estimation: {0}")]
    Execution(String),
    #[error(transparent)]
    Transport(#[from] DeployerError),
}

/// Typed JSON-RPC surface the execution core runs against.
///
/// Every method may fail with a transport error; callers treat those as
/// transient and may retry the enclosing operation.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_block(&self) -> DeployerResult<BlockSnapshot>;

    async fn transaction_count(&self, sender: Address, tag: BlockTag) -> DeployerResult<u64>;

    /// `None` means the transaction is not currently known to this node's
    /// mempool or recent chain
    async fn transaction_by_hash(&self, hash: H256)
        -> DeployerResult<Option<TransactionStatus>>;

    async fn call(
        &self,
        params: &TransactionParams,
        tag: BlockTag,
    ) -> DeployerResult<RawSimulationResult>;

    async fn estimate_gas(&self, params: &TransactionParams) -> Result<U256, EstimationError>;

    /// The fee variant the node currently prefers
    async fn network_fees(&self) -> DeployerResult<NetworkFees>;

    async fn send_transaction(&self, params: &TransactionParams) -> DeployerResult<H256>;
}

/// Multi-provider client with automatic failover for reads.
///
/// Broadcast deliberately does not fail over: re-sending the same raw
/// payload through a second endpoint can double-submit.
pub struct ChainClient {
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    /// Ceiling applied to the EIP-1559 fee recommendation
    max_fee_cap: Option<U256>,
}

impl ChainClient {
    pub fn new(rpc_urls: &[String], max_fee_gwei: Option<u64>) -> DeployerResult<Self> {
        let mut http_providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DeployerError::Config(
                "No valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
            max_fee_cap: max_fee_gwei.map(|g| U256::from(g) * U256::from(1_000_000_000u64)),
        })
    }

    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("RPC failover to provider {}", next);
    }

    /// Run a read against the active provider, rotating through the
    /// remaining endpoints on transport failure
    async fn with_failover<T, F, Fut>(&self, op_name: &str, op: F) -> DeployerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed: {}", op_name, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(DeployerError::Rpc {
            message: match last_error {
                Some(e) => format!("{}: all providers failed: {}", op_name, e),
                None => format!("{}: all providers failed", op_name),
            },
        })
    }

    fn priority_fee_or_fallback(&self, fetched: Result<U256, ProviderError>) -> U256 {
        match fetched {
            Ok(fee) => fee,
            Err(e) => {
                debug!(
                    "eth_maxPriorityFeePerGas unavailable ({}), using fallback",
                    e
                );
                U256::from(FALLBACK_PRIORITY_FEE_WEI)
            }
        }
    }
}

/// Pull the revert payload out of a JSON-RPC error response, when present
fn revert_data(err: &ProviderError) -> Option<Bytes> {
    let rpc_err = err.as_error_response()?;
    let data = rpc_err.data.as_ref()?.as_str()?;
    let raw = hex::decode(data.trim_start_matches("0x")).ok()?;
    Some(Bytes::from(raw))
}

#[async_trait]
impl ChainRpc for ChainClient {
    async fn latest_block(&self) -> DeployerResult<BlockSnapshot> {
        let block = self
            .with_failover("eth_getBlockByNumber", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await?
            .ok_or_else(|| DeployerError::Rpc {
                message: "node returned no latest block".to_string(),
            })?;

        let number = block
            .number
            .ok_or_else(|| DeployerError::Rpc {
                message: "latest block has no number".to_string(),
            })?
            .as_u64();

        Ok(BlockSnapshot {
            number,
            base_fee_per_gas: block.base_fee_per_gas,
        })
    }

    async fn transaction_count(&self, sender: Address, tag: BlockTag) -> DeployerResult<u64> {
        let count = self
            .with_failover("eth_getTransactionCount", |p| async move {
                p.get_transaction_count(sender, Some(tag.into())).await
            })
            .await?;
        Ok(count.as_u64())
    }

    async fn transaction_by_hash(
        &self,
        hash: H256,
    ) -> DeployerResult<Option<TransactionStatus>> {
        let tx = self
            .with_failover("eth_getTransactionByHash", |p| async move {
                p.get_transaction(hash).await
            })
            .await?;

        Ok(tx.map(|tx| TransactionStatus {
            hash: tx.hash,
            block_number: tx.block_number.map(|n| n.as_u64()),
        }))
    }

    async fn call(
        &self,
        params: &TransactionParams,
        tag: BlockTag,
    ) -> DeployerResult<RawSimulationResult> {
        let tx = params.to_typed_transaction();
        match self.http().call(&tx, Some(tag.into())).await {
            Ok(bytes) => Ok(RawSimulationResult::success(bytes)),
            Err(e) => {
                // An error *response* is the node executing and reverting;
                // anything else is transport.
                if e.as_error_response().is_some() {
                    let data = revert_data(&e).unwrap_or_default();
                    Ok(RawSimulationResult::reverted(data))
                } else {
                    Err(DeployerError::Rpc {
                        message: format!("eth_call: {}", e),
                    })
                }
            }
        }
    }

    async fn estimate_gas(&self, params: &TransactionParams) -> Result<U256, EstimationError> {
        let tx = params.to_typed_transaction();
        match self.http().estimate_gas(&tx, None).await {
            Ok(gas) => Ok(gas),
            Err(e) => {
                if let Some(rpc_err) = e.as_error_response() {
                    Err(EstimationError::Execution(rpc_err.message.clone()))
                } else {
                    Err(EstimationError::Transport(DeployerError::Rpc {
                        message: format!("eth_estimateGas: {}", e),
                    }))
                }
            }
        }
    }

    async fn network_fees(&self) -> DeployerResult<NetworkFees> {
        let block = self.latest_block().await?;

        match block.base_fee_per_gas {
            Some(base_fee) => {
                let priority = self.priority_fee_or_fallback(
                    self.http()
                        .request::<_, U256>("eth_maxPriorityFeePerGas", ())
                        .await,
                );

                // Headroom for base fee movement between now and inclusion
                let mut max_fee: U256 = base_fee * 2 + priority;
                if let Some(cap) = self.max_fee_cap {
                    max_fee = max_fee.min(cap);
                }

                Ok(NetworkFees::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority,
                })
            }
            None => {
                let gas_price = self
                    .with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
                    .await?;
                Ok(NetworkFees::Legacy { gas_price })
            }
        }
    }

    async fn send_transaction(&self, params: &TransactionParams) -> DeployerResult<H256> {
        let tx = params.to_typed_transaction();
        let pending = self
            .http()
            .send_transaction(tx, None)
            .await
            .map_err(|e| DeployerError::Rpc {
                message: format!("eth_sendTransaction: {}", e),
            })?;

        Ok(pending.tx_hash())
    }
}
