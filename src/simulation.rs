//! Simulation decoding seam
//!
//! The strategy engine owns the ABI knowledge needed to turn a raw
//! `eth_call` result into a user-facing failure. The core passes raw bytes
//! through this seam and acts only on presence or absence of a decoded
//! failure.

use crate::chain::RawSimulationResult;

use ethers::types::Bytes;

/// A decoded simulation failure, surfaced to the user instead of sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationFailure {
    pub reason: String,
    /// Raw revert payload when the node returned one
    pub revert_data: Option<Bytes>,
}

/// Decodes raw simulation results. `None` means the simulation is fine and
/// the transaction may be broadcast.
pub trait DecodeSimulation: Send + Sync {
    fn decode(&self, raw: &RawSimulationResult) -> Option<SimulationFailure>;
}

/// Decoder that treats every simulation as successful. Useful for callers
/// that do their own diagnosis after the fact.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecoder;

impl DecodeSimulation for NoopDecoder {
    fn decode(&self, _raw: &RawSimulationResult) -> Option<SimulationFailure> {
        None
    }
}
