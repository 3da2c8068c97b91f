//! Gateway error taxonomy and HTTP mapping.
//!
//! Every middleware and handler returns a discriminated error from this
//! module; the `IntoResponse` impl is the single place where error kinds
//! become HTTP statuses and JSON bodies. Error bodies never carry
//! credentials, internal paths, or verbatim upstream responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::network::ChainId;
use crate::types::InvalidReason;

/// Classified failure for a request travelling through the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A paid route was hit without an acceptable proof; the 402 advertiser
    /// builds the full response.
    #[error("payment required")]
    PaymentRequired,

    /// A payment header was present but the rail-specific proof field was
    /// absent or unusable.
    #[error("payment proof missing: {hint}")]
    PaymentMissingProof { hint: String, network: ChainId },

    /// A payment proof was presented and rejected.
    #[error("payment rejected: {reason}")]
    PaymentRejected {
        reason: InvalidReason,
        network: ChainId,
    },

    #[error("rate limited")]
    RateLimited { limit: u32 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    /// Upstream provider (or external facilitator, or the database pool)
    /// could not serve the request; retryable.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        message: String,
        upstream_status: Option<u16>,
    },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    /// The provider this route depends on has no credentials configured.
    #[error("upstream not configured: {0}")]
    UpstreamNotConfigured(String),

    #[error("internal error")]
    Internal,
}

impl GatewayError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::PaymentRequired
            | GatewayError::PaymentMissingProof { .. }
            | GatewayError::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            GatewayError::UpstreamNotConfigured(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        GatewayError::UpstreamUnavailable {
            message: "Service temporarily unavailable".to_string(),
            upstream_status: None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            GatewayError::PaymentRequired => {
                // Reaching here without the advertiser means a route was
                // marked paid but had no catalog entry.
                (status, Json(json!({"error": "Payment required"}))).into_response()
            }
            GatewayError::PaymentMissingProof { hint, network } => (
                status,
                Json(json!({"error": hint, "network": network.to_string()})),
            )
                .into_response(),
            GatewayError::PaymentRejected { reason, network } => (
                status,
                Json(json!({
                    "error": "Payment verification failed",
                    "reason": reason,
                    "network": network.to_string(),
                })),
            )
                .into_response(),
            GatewayError::RateLimited { limit } => {
                let mut response = (
                    status,
                    Json(json!({"error": "Rate limit exceeded"})),
                )
                    .into_response();
                if let Ok(value) = limit.to_string().parse() {
                    response.headers_mut().insert("RateLimit-Limit", value);
                }
                response
            }
            GatewayError::BadRequest(message) => {
                (status, Json(json!({"error": message}))).into_response()
            }
            GatewayError::NotFound => {
                (status, Json(json!({"error": "Not found"}))).into_response()
            }
            GatewayError::Unauthorized => {
                (status, Json(json!({"error": "Unauthorized"}))).into_response()
            }
            GatewayError::UpstreamUnavailable {
                message,
                upstream_status,
            } => {
                let mut body = json!({"error": message, "retryable": true});
                if let Some(code) = upstream_status {
                    body["upstreamStatus"] = json!(code);
                }
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert("Retry-After", "5".parse().expect("static header value"));
                response
            }
            GatewayError::Timeout {
                timeout_ms,
                elapsed_ms,
            } => (
                status,
                Json(json!({
                    "error": "Request timed out",
                    "retryable": true,
                    "timeout_ms": timeout_ms,
                    "elapsed_ms": elapsed_ms,
                })),
            )
                .into_response(),
            GatewayError::UpstreamNotConfigured(provider) => (
                status,
                Json(json!({"error": format!("Provider {provider} is not configured")})),
            )
                .into_response(),
            GatewayError::Internal => {
                let mut response = (
                    status,
                    Json(json!({"error": "Internal error", "retryable": true})),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert("Retry-After", "5".parse().expect("static header value"));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::PaymentRequired.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            GatewayError::PaymentRejected {
                reason: InvalidReason::Replayed,
                network: Network::Megaeth.chain_id(),
            }
            .status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            GatewayError::RateLimited { limit: 60 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Timeout {
                timeout_ms: 30_000,
                elapsed_ms: 30_001,
            }
            .status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamNotConfigured("openai".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable {
                message: "down".into(),
                upstream_status: Some(502),
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::Internal.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_db_errors_surface_as_503() {
        let err: GatewayError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
