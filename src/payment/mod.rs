//! Payment enforcement pipeline.
//!
//! Two middlewares run in fixed order ahead of the upstream dispatchers:
//! [`fast`] intercepts payment headers targeting the fast rail and verifies
//! them directly against the chain; [`permit`] forwards everything else to
//! the external facilitator. A request that clears either one carries a
//! [`context::PaymentContext`] extension downstream; a request that clears
//! neither is answered by the 402 advertiser.

pub mod context;
pub mod fast;
pub mod header;
pub mod permit;
