//! Transaction submission core: nonce allocation, fee policy, the send
//! pipeline and nonce reconciliation

pub mod fees;
pub mod nonce;
pub mod reconcile;
pub mod sender;

pub use fees::{FeePolicy, REPLACEMENT_BUMP_PERCENT};
pub use nonce::NonceAllocator;
pub use reconcile::{NonceReconciler, ReconcileEvent};
pub use sender::{SendOutcome, SendPipeline};
