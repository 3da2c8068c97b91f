//! Payment header codec.
//!
//! Clients present payment in either the `payment-signature` or `x-payment`
//! header (both accepted, checked in that order) as base64-encoded JSON.
//! Anything that fails to decode or parse is treated as "no payment header
//! present" — the 402 advertiser answers those requests.

use axum::http::HeaderMap;
use base64::Engine;

use crate::network::{ChainId, Network};
use crate::types::PaymentHeader;

/// Header names carrying a payment payload, in lookup order.
pub const PAYMENT_HEADER_NAMES: [&str; 2] = ["payment-signature", "x-payment"];

/// Which verification path a payment header is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    /// Direct receipt verification against the fast-rail RPC.
    Fast,
    /// Permit verification through the external facilitator.
    Permit(Network),
    /// Not a network we accept; the request falls through to the
    /// 402 advertiser.
    Unknown,
}

/// Classifies a CAIP-2 network identifier into a verification rail.
pub fn classify_rail(chain_id: &ChainId) -> Rail {
    match Network::from_chain_id(chain_id) {
        Some(network) if network.is_fast_rail() => Rail::Fast,
        Some(network) => Rail::Permit(network),
        None => Rail::Unknown,
    }
}

/// Extracts and decodes the payment header, if one is present and
/// well-formed. Malformed headers decode to `None`.
pub fn extract_payment_header(headers: &HeaderMap) -> Option<PaymentHeader> {
    for name in PAYMENT_HEADER_NAMES {
        let Some(value) = headers.get(name) else {
            continue;
        };
        let Ok(raw) = value.to_str() else {
            tracing::debug!(header = name, "payment header is not valid ASCII");
            continue;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(raw.trim()) else {
            tracing::debug!(header = name, "payment header is not valid base64");
            continue;
        };
        match serde_json::from_slice::<PaymentHeader>(&decoded) {
            Ok(header) => return Some(header),
            Err(e) => {
                tracing::debug!(header = name, error = %e, "payment header JSON unparseable");
            }
        }
    }
    None
}
