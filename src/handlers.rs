//! HTTP endpoints.
//!
//! Three groups:
//! - **Discovery** — `/health`, `/.well-known/x402.json`, `/api/services`:
//!   free, rate-limited at the free tier, never payment-gated.
//! - **Fast-rail facilitator surface** — `/facilitator/megaeth/*`: the
//!   verify/settle/supported/status contract, exposed so external gateways
//!   can use this instance as a MegaETH facilitator.
//! - **Paid dispatch** — the single handler behind every priced route. If
//!   the request reaches it unpaid and unbypassed, the 402 advertiser
//!   answers; otherwise the upstream dispatcher runs.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::app::GatewayState;
use crate::errors::GatewayError;
use crate::facilitator::Facilitator;
use crate::payment::context::{DevBypassed, PaymentContext};
use crate::payment::fast::service_method;
use crate::types::{AcceptEntry, VerifyOutcome};

/// `GET /`: endpoint index.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "endpoints": {
            "health": "GET /health",
            "discovery": "GET /.well-known/x402.json",
            "services": "GET /api/services",
            "service": "GET /api/services/{id}",
            "facilitator": {
                "supported": "GET /facilitator/megaeth/supported",
                "verify": "POST /facilitator/megaeth/verify",
                "settle": "POST /facilitator/megaeth/settle",
                "status": "GET /facilitator/megaeth/status",
            },
        },
    }))
}

/// `GET /health`.
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /.well-known/x402.json`: the discovery document, precomputed at
/// startup.
#[instrument(skip_all)]
pub async fn get_wellknown(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.wellknown.clone())
}

/// `GET /api/services`.
#[instrument(skip_all)]
pub async fn get_services(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({"services": state.services.all()}))
}

/// `GET /api/services/{id}`.
#[instrument(skip_all)]
pub async fn get_service(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Response {
    match state.services.get(&id) {
        Some(service) => Json(service).into_response(),
        None => GatewayError::NotFound.into_response(),
    }
}

/// Wire body of the facilitator verify/settle endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorWireRequest {
    pub payment_payload: serde_json::Value,
    pub payment_requirements: AcceptEntry,
}

impl FacilitatorWireRequest {
    /// The rail-specific proof: the `payload` field of a full payment
    /// header if present, otherwise the value itself.
    fn proof_payload(&self) -> &serde_json::Value {
        self.payment_payload
            .get("payload")
            .unwrap_or(&self.payment_payload)
    }
}

/// `GET /facilitator/megaeth/supported`.
#[instrument(skip_all)]
pub async fn facilitator_supported(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.fast.supported().await)
}

/// `POST /facilitator/megaeth/verify`: 200 on valid, 402 on invalid.
#[instrument(skip_all)]
pub async fn facilitator_verify(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<FacilitatorWireRequest>,
) -> Response {
    let outcome = state
        .fast
        .verify(body.proof_payload(), &body.payment_requirements)
        .await;
    match &outcome {
        VerifyOutcome::Valid { .. } => (StatusCode::OK, Json(outcome)).into_response(),
        VerifyOutcome::Invalid { reason } => {
            tracing::info!(reason = %reason, "facilitator verify rejected");
            (StatusCode::PAYMENT_REQUIRED, Json(outcome)).into_response()
        }
    }
}

/// `POST /facilitator/megaeth/settle`: no-op settlement on the fast rail.
#[instrument(skip_all)]
pub async fn facilitator_settle(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<FacilitatorWireRequest>,
) -> Response {
    match state
        .fast
        .settle(body.proof_payload(), &body.payment_requirements)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "fast-rail settle failed");
            GatewayError::Internal.into_response()
        }
    }
}

/// `GET /facilitator/megaeth/status`.
#[instrument(skip_all)]
pub async fn facilitator_status(State(state): State<Arc<GatewayState>>) -> Response {
    let chain = state.chains.fast_rail();
    let used = match state.ledger.stats().await {
        Ok(stats) => stats.total_used_proofs,
        Err(e) => return GatewayError::from(e).into_response(),
    };
    Json(json!({
        "network": chain.chain_id.to_string(),
        "connected": true,
        "stablecoin": chain.stablecoin,
        "usedTxHashes": used,
    }))
    .into_response()
}

/// The uniform handler behind every priced route.
///
/// By the time a request arrives here it has passed the rate limiter, the
/// timeout enforcer, the dev bypass gate, and both payment middlewares. An
/// unpaid request gets the 402 advertisement; a paid one is dispatched
/// upstream.
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn dispatch_paid_route(
    State(state): State<Arc<GatewayState>>,
    req: Request,
) -> Response {
    let Some(method) = service_method(req.method()) else {
        return GatewayError::NotFound.into_response();
    };
    let path = req.uri().path().to_string();
    let original_url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let Some(service) = state.services.match_route(method, &path).cloned() else {
        return GatewayError::NotFound.into_response();
    };

    let payment = req.extensions().get::<PaymentContext>().cloned();
    let bypassed = req.extensions().get::<DevBypassed>().is_some();
    if payment.is_none() && !bypassed {
        return state.advertiser.respond_402(&service, &original_url);
    }

    let query: BTreeMap<String, String> = req
        .uri()
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let body_cap = if service.category == "transcribe" {
        state.config.request.transcribe_body_size_bytes
    } else {
        state.config.request.max_body_size_bytes
    };
    let body = match axum::body::to_bytes(req.into_body(), body_cap).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => Some(value),
            Err(_) => {
                return GatewayError::BadRequest("request body is not valid JSON".to_string())
                    .into_response();
            }
        },
        Err(_) => {
            return GatewayError::BadRequest(format!(
                "request body exceeds {body_cap} bytes"
            ))
            .into_response();
        }
    };

    match crate::upstream::dispatch(&state, &service, &query, body.as_ref(), payment.as_ref())
        .await
    {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}
