//! Fee computation for the next send of an on-chain interaction
//!
//! A resend replaces a mempool entry at the same nonce, which nodes only
//! accept above a minimum price bump. The policy therefore returns the
//! field-wise maximum of the current network recommendation and 110% of
//! the previous attempt's fees.

use crate::chain::{ChainRpc, NetworkFees};
use crate::error::{DeployerError, DeployerResult};
use crate::state::OnchainInteraction;

use tracing::debug;

/// Minimum replacement bump, as a percentage of the previous fees
pub const REPLACEMENT_BUMP_PERCENT: u64 = 110;

/// Computes fees for the next broadcast of an interaction
pub struct FeePolicy {
    bump_percent: u64,
}

impl FeePolicy {
    pub fn new() -> Self {
        Self {
            bump_percent: REPLACEMENT_BUMP_PERCENT,
        }
    }

    /// Fees for the next send: the network recommendation on a first send,
    /// otherwise bumped above the previous attempt.
    pub async fn next_fees(
        &self,
        rpc: &dyn ChainRpc,
        interaction: &OnchainInteraction,
    ) -> DeployerResult<NetworkFees> {
        let recommended = rpc.network_fees().await?;

        let prev = match interaction.latest_fees() {
            None => return Ok(recommended),
            Some(prev) => *prev,
        };

        let prev = match (&recommended, prev) {
            // The node moved to EIP-1559 since the last attempt: the old
            // gas price bounds both new fields.
            (NetworkFees::Eip1559 { .. }, NetworkFees::Legacy { gas_price }) => {
                NetworkFees::Eip1559 {
                    max_fee_per_gas: gas_price,
                    max_priority_fee_per_gas: gas_price,
                }
            }
            // A node cannot walk back from EIP-1559 to legacy within one
            // deployment; replacing a 1559 mempool entry with a legacy one
            // is not expressible.
            (NetworkFees::Legacy { .. }, NetworkFees::Eip1559 { .. }) => {
                return Err(DeployerError::Eip1559Downgrade)
            }
            (_, prev) => prev,
        };

        let bumped = prev.scaled(self.bump_percent);
        // variants agree after the normalization above
        let fees = recommended.field_max(&bumped).unwrap_or(bumped);

        debug!(
            "Fees for interaction {}: recommended {:?}, bumped {:?} -> {:?}",
            interaction.id, recommended, bumped, fees
        );
        Ok(fees)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{interaction_with_fees, unsent_interaction, MockRpc};
    use ethers::types::U256;

    fn eip1559(max_fee: u64, max_priority: u64) -> NetworkFees {
        NetworkFees::Eip1559 {
            max_fee_per_gas: U256::from(max_fee),
            max_priority_fee_per_gas: U256::from(max_priority),
        }
    }

    fn legacy(gas_price: u64) -> NetworkFees {
        NetworkFees::Legacy {
            gas_price: U256::from(gas_price),
        }
    }

    #[tokio::test]
    async fn first_send_uses_recommendation() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(eip1559(100, 2));

        let fees = FeePolicy::new()
            .next_fees(&rpc, &unsent_interaction())
            .await
            .unwrap();
        assert_eq!(fees, eip1559(100, 2));
    }

    #[tokio::test]
    async fn resend_bumps_over_stale_recommendation() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(eip1559(90, 1));

        let interaction = interaction_with_fees(5, eip1559(100, 2));
        let fees = FeePolicy::new()
            .next_fees(&rpc, &interaction)
            .await
            .unwrap();

        // max({90,1}, {110,2})
        assert_eq!(fees, eip1559(110, 2));
    }

    #[tokio::test]
    async fn resend_follows_a_rising_market() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(eip1559(500, 3));

        let interaction = interaction_with_fees(5, eip1559(100, 2));
        let fees = FeePolicy::new()
            .next_fees(&rpc, &interaction)
            .await
            .unwrap();

        assert_eq!(fees, eip1559(500, 3));
    }

    #[tokio::test]
    async fn legacy_resend_bumps_gas_price() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(legacy(50));

        let interaction = interaction_with_fees(5, legacy(100));
        let fees = FeePolicy::new()
            .next_fees(&rpc, &interaction)
            .await
            .unwrap();

        assert_eq!(fees, legacy(110));
    }

    #[tokio::test]
    async fn legacy_history_upgrades_into_eip1559() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(eip1559(90, 1));

        let interaction = interaction_with_fees(5, legacy(100));
        let fees = FeePolicy::new()
            .next_fees(&rpc, &interaction)
            .await
            .unwrap();

        // prior gas price widens into both fields before the bump
        assert_eq!(fees, eip1559(110, 110));
    }

    #[tokio::test]
    async fn eip1559_to_legacy_is_a_hard_error() {
        let rpc = MockRpc::new();
        rpc.set_network_fees(legacy(200));

        let interaction = interaction_with_fees(5, eip1559(100, 2));
        let err = FeePolicy::new()
            .next_fees(&rpc, &interaction)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployerError::Eip1559Downgrade));
    }
}
