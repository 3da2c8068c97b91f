//! Fast-rail chain access.
//!
//! The gateway's only direct chain interaction is read-only: fetching
//! transaction receipts from the fast-rail RPC and validating stablecoin
//! `Transfer` events inside them. Settlement never originates here — the
//! client already paid on-chain before presenting the transaction hash.

pub mod receipt;

pub use receipt::{ReceiptError, ReceiptVerifier, VerifiedTransfer};
