//! Fast-rail payment middleware.
//!
//! Runs ahead of the permit middleware. Intercepts payment headers whose
//! network is the fast rail, verifies the referenced transaction directly
//! from RPC, and marks the request paid. Headers targeting other rails —
//! and requests with no usable header — pass through untouched.
//!
//! Request lifecycle: `unauthenticated → verifying → {verified | rejected}`.
//! Rejection is terminal (402); a verified request proceeds downstream and
//! a `payment-fast` row is enqueued to the request log with the final
//! upstream status and total latency.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;

use crate::app::GatewayState;
use crate::errors::GatewayError;
use crate::facilitator::Facilitator;
use crate::ledger::RequestLogEntry;
use crate::payment::context::{DevBypassed, PaymentContext, SettlementMethod};
use crate::payment::header::{classify_rail, extract_payment_header, Rail};
use crate::services::ServiceMethod;
use crate::types::VerifyOutcome;

pub async fn fast_rail_middleware(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<DevBypassed>().is_some()
        || req.extensions().get::<PaymentContext>().is_some()
    {
        return next.run(req).await;
    }

    let Some(header) = extract_payment_header(req.headers()) else {
        return next.run(req).await;
    };
    if classify_rail(&header.accepted.network) != Rail::Fast {
        return next.run(req).await;
    }

    let Some(method) = service_method(req.method()) else {
        return next.run(req).await;
    };
    let path = req.uri().path().to_string();
    let Some(service) = state.services.match_route(method, &path) else {
        return next.run(req).await;
    };
    let service_id = service.id.clone();

    let fast_chain = state.chains.fast_rail();
    let requirement = match state.advertiser.accept_entry(service, fast_chain) {
        Ok(requirement) => requirement,
        Err(e) => {
            tracing::error!(service = %service_id, error = %e, "unpriceable catalog entry");
            return GatewayError::Internal.into_response();
        }
    };

    let tx_hash = header.payload.get("txHash").and_then(|v| v.as_str());
    if !tx_hash.is_some_and(|h| h.starts_with("0x")) {
        return GatewayError::PaymentMissingProof {
            hint: "MegaETH-style payments require txHash in payload".to_string(),
            network: fast_chain.chain_id.clone(),
        }
        .into_response();
    }

    let started = Instant::now();
    let outcome = state
        .fast
        .verify(&header.payload, &requirement)
        .await;
    let (payer, proof) = match outcome {
        VerifyOutcome::Valid { payer } => {
            let proof = tx_hash
                .and_then(crate::chain::receipt::normalize_tx_hash);
            (payer, proof)
        }
        VerifyOutcome::Invalid { reason } => {
            return GatewayError::PaymentRejected {
                reason,
                network: fast_chain.chain_id.clone(),
            }
            .into_response();
        }
    };

    let context = PaymentContext {
        payer: payer.clone(),
        network: requirement.network.clone(),
        amount: requirement.amount,
        proof,
        method: SettlementMethod::Direct,
    };
    req.extensions_mut().insert(context);

    let response = next.run(req).await;

    // Response-finalization hook: one log row keyed to the payment itself,
    // carrying the final upstream status and total latency.
    let mut entry = RequestLogEntry::new("payment-fast", path);
    entry.payer = Some(payer);
    entry.network = Some(requirement.network.to_string());
    entry.amount = Some(requirement.amount.to_string());
    entry.scheme = Some("exact".to_string());
    entry.upstream_status = Some(response.status().as_u16() as i32);
    entry.latency_ms = started.elapsed().as_millis() as i64;
    state.log_queue.enqueue(entry);

    response
}

/// Maps an HTTP method onto the catalog's method set.
pub fn service_method(method: &axum::http::Method) -> Option<ServiceMethod> {
    if *method == axum::http::Method::GET {
        Some(ServiceMethod::Get)
    } else if *method == axum::http::Method::POST {
        Some(ServiceMethod::Post)
    } else {
        None
    }
}
