//! Request-scoped payment annotations.
//!
//! Once a payment proof is verified, the verdict travels with the request
//! as an explicit extension value rather than mutable request state, so
//! downstream handlers (and the request logger) can read who paid, on
//! which network, and how.

use crate::network::ChainId;
use crate::types::TokenAmount;

/// How a verified payment was (or will be) settled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettlementMethod {
    /// Fast rail: the transfer was already final on-chain when verified.
    Direct,
    /// Permit rails: settlement is executed by the external facilitator
    /// after the handler completes.
    Facilitated,
}

/// Attached to a request once its payment has been verified.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub payer: String,
    pub network: ChainId,
    pub amount: TokenAmount,
    /// Fast rail: the lowercased transaction hash used as the proof key.
    pub proof: Option<String>,
    pub method: SettlementMethod,
}

/// Attached to a request admitted through the dev bypass; payment
/// middlewares skip a request carrying this marker.
#[derive(Debug, Clone, Copy)]
pub struct DevBypassed;
