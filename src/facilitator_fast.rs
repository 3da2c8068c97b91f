//! Fast-rail facilitator: direct receipt verification plus replay ledger.
//!
//! Verification on the fast rail reads the payment transaction's receipt
//! straight from RPC ([`crate::chain::ReceiptVerifier`]) and then claims
//! the transaction hash in the ledger. The claim — an insert-or-ignore on
//! the `used_tx_hashes` primary key — is what makes acceptance at-most-once
//! under concurrency: the loser of the insert race sees `replayed`.
//!
//! Settlement is a no-op; the funds moved before the client ever contacted
//! the gateway.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::chain::ReceiptVerifier;
use crate::facilitator::{Facilitator, FacilitatorError};
use crate::ledger::Ledger;
use crate::types::{
    truncate_hash, AcceptEntry, InvalidReason, Scheme, SettleOutcome, SupportedKind,
    SupportedResponse, VerifyOutcome, X402Version2,
};

/// EIP-712 domain advertised for the fast-rail stablecoin.
const EIP712_NAME: &str = "USDm";
const EIP712_VERSION: &str = "1";

pub struct FastRailFacilitator {
    verifier: Arc<ReceiptVerifier>,
    ledger: Ledger,
}

impl FastRailFacilitator {
    pub fn new(verifier: Arc<ReceiptVerifier>, ledger: Ledger) -> Self {
        Self { verifier, ledger }
    }

    /// The EIP-712 extra block included in fast-rail accept entries.
    pub fn extra() -> serde_json::Value {
        json!({"name": EIP712_NAME, "version": EIP712_VERSION})
    }

    fn extract_tx_hash(payload: &serde_json::Value) -> Option<&str> {
        payload.get("txHash").and_then(|v| v.as_str())
    }
}

#[async_trait]
impl Facilitator for FastRailFacilitator {
    async fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: vec![SupportedKind {
                x402_version: X402Version2,
                scheme: Scheme::Exact,
                network: self.verifier.chain_id().clone(),
                extra: Some(Self::extra()),
            }],
        }
    }

    async fn verify(
        &self,
        payload: &serde_json::Value,
        requirement: &AcceptEntry,
    ) -> VerifyOutcome {
        let Some(tx_hash) = Self::extract_tx_hash(payload) else {
            return VerifyOutcome::invalid(InvalidReason::MissingProof);
        };
        let Some(normalized) = crate::chain::receipt::normalize_tx_hash(tx_hash) else {
            return VerifyOutcome::invalid(InvalidReason::MalformedProof);
        };

        // Fast-path probe only: saves the RPC round trip on an obvious
        // replay. Admission is decided by record_proof below.
        match self.ledger.is_proof_used(&normalized).await {
            Ok(true) => return VerifyOutcome::invalid(InvalidReason::Replayed),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "proof probe failed; continuing to full verification");
            }
        }

        let transfer = match self
            .verifier
            .verify_transfer(&normalized, requirement.amount.0, &requirement.pay_to)
            .await
        {
            Ok(transfer) => transfer,
            Err(e) => {
                tracing::info!(
                    tx = %truncate_hash(&normalized),
                    reason = %e.reason(),
                    "fast-rail verification rejected"
                );
                return VerifyOutcome::invalid(e.reason());
            }
        };

        let payer = format!("{:#x}", transfer.payer);
        match self
            .ledger
            .record_proof(
                &transfer.tx_hash,
                &payer,
                &requirement.amount.to_string(),
                &requirement.network,
            )
            .await
        {
            Ok(true) => VerifyOutcome::valid(payer),
            Ok(false) => VerifyOutcome::invalid(InvalidReason::Replayed),
            Err(e) => {
                // Without a recorded proof we cannot admit the payment.
                tracing::error!(error = %e, "proof record failed");
                VerifyOutcome::invalid(InvalidReason::UpstreamUnavailable)
            }
        }
    }

    async fn settle(
        &self,
        payload: &serde_json::Value,
        requirement: &AcceptEntry,
    ) -> Result<SettleOutcome, FacilitatorError> {
        // The transfer is already final on-chain; settlement just echoes it.
        let transaction = Self::extract_tx_hash(payload)
            .and_then(crate::chain::receipt::normalize_tx_hash);
        Ok(SettleOutcome {
            success: true,
            transaction,
            network: requirement.network.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tx_hash() {
        let payload = json!({"txHash": "0xabc"});
        assert_eq!(FastRailFacilitator::extract_tx_hash(&payload), Some("0xabc"));
        assert_eq!(
            FastRailFacilitator::extract_tx_hash(&json!({"permit": {}})),
            None
        );
        assert_eq!(FastRailFacilitator::extract_tx_hash(&json!(null)), None);
    }

    #[test]
    fn test_extra_block() {
        let extra = FastRailFacilitator::extra();
        assert_eq!(extra["name"], "USDm");
        assert_eq!(extra["version"], "1");
    }
}
