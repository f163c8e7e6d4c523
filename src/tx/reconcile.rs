//! Nonce reconciliation between local deployment state and the chain
//!
//! On restart, or between steps, the locally tracked pending transactions
//! may have been dropped from the mempool or replaced by transactions the
//! user sent outside the deployment. Reconciliation compares the sender's
//! transaction counts at three observation points (safe block, latest,
//! pending) against the nonces we hold and either emits corrective events
//! or asks the caller to wait for confirmations.

use crate::chain::{BlockTag, ChainRpc};
use crate::error::{DeployerError, DeployerResult};
use crate::plan::ModulePlan;
use crate::state::{DeploymentState, ExecutionStatus};

use ethers::types::{Address, H256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Corrective event for one interaction. Applying it to the deployment
/// state is the caller's move; the reconciler itself never mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// All our transactions for the nonce vanished and nothing else took
    /// it: the interaction can be resent under the same nonce
    InteractionDropped {
        future_id: String,
        interaction_id: u64,
    },
    /// A user transaction consumed the nonce and is safely confirmed: the
    /// interaction needs a fresh nonce
    InteractionReplacedByUser {
        future_id: String,
        interaction_id: u64,
    },
}

impl ReconcileEvent {
    pub fn apply(&self, state: &mut DeploymentState) -> DeployerResult<()> {
        match self {
            ReconcileEvent::InteractionDropped {
                future_id,
                interaction_id,
            } => state.mark_interaction_dropped(future_id, *interaction_id),
            ReconcileEvent::InteractionReplacedByUser {
                future_id,
                interaction_id,
            } => state.mark_interaction_replaced(future_id, *interaction_id),
        }
    }
}

/// One locally owned nonce under reconciliation
#[derive(Debug, Clone)]
struct PendingNonce {
    nonce: u64,
    tx_hashes: Vec<H256>,
    future_id: String,
    interaction_id: u64,
}

/// Reconciles locally tracked nonces with network-observed nonce state
pub struct NonceReconciler;

impl NonceReconciler {
    /// Run one reconciliation pass.
    ///
    /// Senders are processed sequentially, each against its own snapshot of
    /// (latest block, safe count, pending count, latest count), taken in
    /// that order. Events for one sender come out in ascending nonce order.
    pub async fn reconcile(
        rpc: &dyn ChainRpc,
        state: &DeploymentState,
        plan: &ModulePlan,
        accounts: &[Address],
        default_sender: Option<Address>,
        required_confirmations: u64,
    ) -> DeployerResult<Vec<ReconcileEvent>> {
        let pending = Self::pending_by_sender(state, plan, accounts, default_sender)?;

        let mut events = Vec::new();
        for (sender, entries) in pending {
            Self::reconcile_sender(rpc, sender, &entries, required_confirmations, &mut events)
                .await?;
        }

        Ok(events)
    }

    /// Group the locally owned nonces by sender, sorted ascending.
    ///
    /// Senders of planned-but-unstarted futures get an (empty) entry too: a
    /// user transaction from an account we have not used yet still
    /// constrains the nonces we are about to allocate.
    fn pending_by_sender(
        state: &DeploymentState,
        plan: &ModulePlan,
        accounts: &[Address],
        default_sender: Option<Address>,
    ) -> DeployerResult<BTreeMap<Address, Vec<PendingNonce>>> {
        let mut pending: BTreeMap<Address, Vec<PendingNonce>> = BTreeMap::new();

        for exec in state.iter() {
            if !exec.kind.produces_transactions() || exec.status == ExecutionStatus::Success {
                continue;
            }
            let interaction = match exec.pending_interaction() {
                Some(ni) => ni,
                None => continue,
            };
            let nonce = match interaction.nonce {
                Some(nonce) => nonce,
                None => continue,
            };
            // a reserved nonce with no broadcasts yet has nothing to check
            // against the mempool; the journal record protects it
            if interaction.transactions.is_empty() {
                continue;
            }

            pending
                .entry(interaction.from)
                .or_default()
                .push(PendingNonce {
                    nonce,
                    tx_hashes: interaction.transaction_hashes(),
                    future_id: exec.id.clone(),
                    interaction_id: interaction.id,
                });
        }

        for future in plan.iter() {
            if state.contains(&future.id) {
                continue;
            }
            if let Some(sender) = future.resolve_sender(accounts, default_sender)? {
                pending.entry(sender).or_default();
            }
        }

        for entries in pending.values_mut() {
            entries.sort_by_key(|e| e.nonce);
        }

        Ok(pending)
    }

    async fn reconcile_sender(
        rpc: &dyn ChainRpc,
        sender: Address,
        entries: &[PendingNonce],
        required_confirmations: u64,
        events: &mut Vec<ReconcileEvent>,
    ) -> DeployerResult<()> {
        let block = rpc.latest_block().await?;
        let safe_block = (block.number + 1).checked_sub(required_confirmations);

        let safe_count = match safe_block {
            Some(number) => Some(
                rpc.transaction_count(sender, BlockTag::Number(number))
                    .await?,
            ),
            None => None,
        };
        let pending_count = rpc.transaction_count(sender, BlockTag::Pending).await?;
        let latest_count = rpc.transaction_count(sender, BlockTag::Latest).await?;

        let has_unconfirmed = match safe_count {
            None => pending_count > 0,
            Some(safe_count) => safe_count != pending_count,
        };

        debug!(
            "Reconciling {:?}: block {}, safe_count {:?}, pending_count {}, latest_count {}, owned nonces {}",
            sender,
            block.number,
            safe_count,
            pending_count,
            latest_count,
            entries.len()
        );

        if entries.is_empty() {
            if has_unconfirmed {
                return Err(DeployerError::WaitingForConfirmations {
                    sender,
                    required_confirmations,
                });
            }
            return Ok(());
        }

        for entry in entries {
            if Self::any_transaction_known(rpc, &entry.tx_hashes).await? {
                continue;
            }

            // every broadcast we made for this nonce is gone from the node
            if latest_count > entry.nonce {
                // the nonce was mined, but not by us
                match safe_count {
                    Some(safe_count) if safe_count > entry.nonce => {
                        warn!(
                            "Nonce {} of {:?} was replaced by a confirmed user transaction",
                            entry.nonce, sender
                        );
                        events.push(ReconcileEvent::InteractionReplacedByUser {
                            future_id: entry.future_id.clone(),
                            interaction_id: entry.interaction_id,
                        });
                    }
                    _ => {
                        return Err(DeployerError::WaitingForNonce {
                            sender,
                            nonce: entry.nonce,
                            required_confirmations,
                        })
                    }
                }
            } else if pending_count > entry.nonce {
                // the user's replacement sits in the mempool, unconfirmed
                return Err(DeployerError::WaitingForNonce {
                    sender,
                    nonce: entry.nonce,
                    required_confirmations,
                });
            } else {
                warn!(
                    "All transactions of {:?} at nonce {} were dropped from the mempool",
                    sender, entry.nonce
                );
                events.push(ReconcileEvent::InteractionDropped {
                    future_id: entry.future_id.clone(),
                    interaction_id: entry.interaction_id,
                });
            }
        }

        // user transactions queued above our highest nonce
        if let Some(last) = entries.last() {
            if last.nonce + 1 < pending_count && has_unconfirmed {
                return Err(DeployerError::WaitingForNonce {
                    sender,
                    nonce: pending_count - 1,
                    required_confirmations,
                });
            }
        }

        Ok(())
    }

    async fn any_transaction_known(
        rpc: &dyn ChainRpc,
        hashes: &[H256],
    ) -> DeployerResult<bool> {
        for hash in hashes {
            if rpc.transaction_by_hash(*hash).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
