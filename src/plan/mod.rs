//! Module plan view consumed by the execution core
//!
//! The planner's dependency DAG is out of scope here; the core only needs
//! to iterate the planned futures and resolve each one's sender, so that
//! nonce reconciliation also inspects senders that have not transacted yet.

use crate::error::{DeployerError, DeployerResult};
use crate::state::FutureKind;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// How a future names its sending account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderDescriptor {
    Explicit(Address),
    AccountIndex(usize),
    Default,
}

/// One future of the module plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedFuture {
    pub id: String,
    pub kind: FutureKind,
    pub from: SenderDescriptor,
}

impl PlannedFuture {
    /// Resolve the concrete sender for this future.
    ///
    /// Read-only futures never submit transactions and resolve to `None`:
    /// contract-at, read-event-argument and encode-function-call hold no
    /// nonce and must not constrain reconciliation.
    pub fn resolve_sender(
        &self,
        accounts: &[Address],
        default_sender: Option<Address>,
    ) -> DeployerResult<Option<Address>> {
        if !self.kind.produces_transactions() && self.kind != FutureKind::StaticCall {
            return Ok(None);
        }

        let sender = match self.from {
            SenderDescriptor::Explicit(address) => address,
            SenderDescriptor::AccountIndex(index) => {
                *accounts
                    .get(index)
                    .ok_or(DeployerError::AccountIndexOutOfRange {
                        index,
                        available: accounts.len(),
                    })?
            }
            SenderDescriptor::Default => {
                default_sender.ok_or(DeployerError::MissingDefaultSender)?
            }
        };

        Ok(Some(sender))
    }
}

/// Finite set of futures yielded by one deployment module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulePlan {
    pub futures: Vec<PlannedFuture>,
}

impl ModulePlan {
    pub fn new(futures: Vec<PlannedFuture>) -> Self {
        Self { futures }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedFuture> {
        self.futures.iter()
    }
}
