//! HTTP client for the external permit-settlement facilitator.
//!
//! The permit rails (Base, Solana) are served by an external facilitator
//! exposing the same `{supported, verify, settle}` trio over HTTP. This
//! client is a strict wire proxy: permit payloads pass through as opaque
//! JSON, and the gateway never interprets rail-specific semantics.
//! Transport failures and timeouts classify as `upstream_unavailable`.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::facilitator::{Facilitator, FacilitatorError};
use crate::types::{
    AcceptEntry, InvalidReason, SettleOutcome, SupportedResponse, VerifyOutcome,
};

pub struct RemoteFacilitator {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteFacilitator {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/{}", self.base_url, op)
    }

    fn wire_request(payload: &serde_json::Value, requirement: &AcceptEntry) -> serde_json::Value {
        json!({
            "x402Version": 2,
            "paymentPayload": payload,
            "paymentRequirements": requirement,
        })
    }
}

#[async_trait]
impl Facilitator for RemoteFacilitator {
    async fn supported(&self) -> SupportedResponse {
        match self.http.get(self.url("supported")).send().await {
            Ok(response) => response
                .json::<SupportedResponse>()
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "unparseable facilitator manifest");
                    SupportedResponse { kinds: vec![] }
                }),
            Err(e) => {
                tracing::warn!(error = %e, "facilitator manifest fetch failed");
                SupportedResponse { kinds: vec![] }
            }
        }
    }

    async fn verify(
        &self,
        payload: &serde_json::Value,
        requirement: &AcceptEntry,
    ) -> VerifyOutcome {
        let body = Self::wire_request(payload, requirement);
        let response = match self.http.post(self.url("verify")).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, network = %requirement.network, "facilitator verify transport error");
                return VerifyOutcome::invalid(InvalidReason::UpstreamUnavailable);
            }
        };

        // The facilitator expresses rejection in the response body whatever
        // the status; an unparseable body is a rejection.
        match response.json::<VerifyOutcome>().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable facilitator verify response");
                VerifyOutcome::invalid(InvalidReason::FacilitatorRejected)
            }
        }
    }

    async fn settle(
        &self,
        payload: &serde_json::Value,
        requirement: &AcceptEntry,
    ) -> Result<SettleOutcome, FacilitatorError> {
        let body = Self::wire_request(payload, requirement);
        let response = self
            .http
            .post(self.url("settle"))
            .json(&body)
            .send()
            .await
            .map_err(|e| FacilitatorError::Unavailable(e.to_string()))?;

        let status = response.status();
        let outcome: SettleOutcome = response
            .json()
            .await
            .map_err(|e| FacilitatorError::Rejected(format!("unparseable response: {e}")))?;
        if !status.is_success() && !outcome.success {
            return Err(FacilitatorError::Rejected(format!(
                "settlement failed with status {status}"
            )));
        }
        Ok(outcome)
    }
}
