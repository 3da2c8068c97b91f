//! Facilitator capability.
//!
//! Both payment back-ends — the in-process fast-rail verifier and the
//! external permit-settlement service — expose the same three operations.
//! Callers never learn which backend served them; in particular they must
//! tolerate `settle` being a no-op, which it is on the fast rail where the
//! transfer already happened on-chain.

use async_trait::async_trait;

use crate::types::{AcceptEntry, SettleOutcome, SupportedResponse, VerifyOutcome};

/// Transport-level settlement failure. Verification failures are not
/// errors — they are `VerifyOutcome::Invalid`.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("facilitator unavailable: {0}")]
    Unavailable(String),
    #[error("facilitator rejected settlement: {0}")]
    Rejected(String),
}

/// The `{get_supported, verify, settle}` contract shared by every rail.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Static manifest of the payment kinds this backend can process.
    async fn supported(&self) -> SupportedResponse;

    /// Verifies a rail-specific payment payload against a requirement.
    /// Infrastructure failures surface as
    /// [`crate::types::InvalidReason::UpstreamUnavailable`].
    async fn verify(&self, payload: &serde_json::Value, requirement: &AcceptEntry)
        -> VerifyOutcome;

    /// Settles a previously verified payment. No-op on rails where the
    /// transfer precedes verification.
    async fn settle(
        &self,
        payload: &serde_json::Value,
        requirement: &AcceptEntry,
    ) -> Result<SettleOutcome, FacilitatorError>;
}
