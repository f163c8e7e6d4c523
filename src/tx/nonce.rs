//! Nonce allocation for deployment senders
//!
//! Hands out the next unused nonce per sender. Allocation is bookkeeping
//! only: the reservation becomes real when the send pipeline writes the
//! nonce onto the interaction and journals the intent.

use crate::chain::{BlockTag, ChainRpc};
use crate::error::DeployerResult;

use dashmap::DashMap;
use ethers::types::Address;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-sender allocation state
struct SenderNonceState {
    /// Next nonce to hand out
    next: u64,
}

/// Allocates nonces across all senders of a deployment
#[derive(Default)]
pub struct NonceAllocator {
    senders: DashMap<Address, Mutex<SenderNonceState>>,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the next nonce for a sender.
    ///
    /// On first touch the sender's view is seeded from the node's pending
    /// transaction count; every later call hands out the next value.
    pub async fn next_nonce(
        &self,
        rpc: &dyn ChainRpc,
        sender: Address,
    ) -> DeployerResult<u64> {
        loop {
            if let Some(state) = self.senders.get(&sender) {
                let mut state = state.lock().await;
                let nonce = state.next;
                state.next += 1;
                debug!("Allocated nonce {} for sender {:?}", nonce, sender);
                return Ok(nonce);
            }

            let pending_count = rpc.transaction_count(sender, BlockTag::Pending).await?;
            self.senders
                .entry(sender)
                .or_insert_with(|| Mutex::new(SenderNonceState {
                    next: pending_count,
                }));
            debug!(
                "Seeded nonce view for sender {:?} at pending count {}",
                sender, pending_count
            );
        }
    }

    /// Drop a sender's cached view. The next allocation re-seeds from the
    /// network; called after reconciliation frees or cedes nonces.
    pub fn forget(&self, sender: Address) {
        self.senders.remove(&sender);
    }
}
