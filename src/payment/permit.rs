//! Permit-rail payment middleware.
//!
//! Applies to requests not already verified (by the fast-rail middleware)
//! and not dev-bypassed. The presented permit is forwarded opaquely to the
//! external facilitator's `verify`; on success the request is marked paid
//! and dispatched, and `settle` is invoked once the handler has completed.
//! A settlement failure after the response has been served is logged and
//! forgotten — it never retroactively fails the request.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::app::GatewayState;
use crate::errors::GatewayError;
use crate::facilitator::Facilitator;
use crate::payment::context::{DevBypassed, PaymentContext, SettlementMethod};
use crate::payment::fast::service_method;
use crate::payment::header::{classify_rail, extract_payment_header, Rail};
use crate::types::{truncate_hash, VerifyOutcome};

pub async fn permit_rail_middleware(
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
    let network = match classify_rail(&header.accepted.network) {
        Rail::Permit(network) => network,
        // Fast-rail headers were the previous middleware's business; unknown
        // networks fall through to the 402 advertiser.
        Rail::Fast | Rail::Unknown => return next.run(req).await,
    };

    let Some(method) = service_method(req.method()) else {
        return next.run(req).await;
    };
    let path = req.uri().path().to_string();
    let Some(service) = state.services.match_route(method, &path) else {
        return next.run(req).await;
    };

    let Some(chain) = state.chains.by_network(network) else {
        return next.run(req).await;
    };
    let requirement = match state.advertiser.accept_entry(service, chain) {
        Ok(requirement) => requirement,
        Err(e) => {
            tracing::error!(service = %service.id, error = %e, "unpriceable catalog entry");
            return GatewayError::Internal.into_response();
        }
    };

    let outcome = state.remote.verify(&header.payload, &requirement).await;
    let payer = match outcome {
        VerifyOutcome::Valid { payer } => payer,
        VerifyOutcome::Invalid { reason } => {
            return GatewayError::PaymentRejected {
                reason,
                network: chain.chain_id.clone(),
            }
            .into_response();
        }
    };

    let context = PaymentContext {
        payer: payer.clone(),
        network: requirement.network.clone(),
        amount: requirement.amount,
        proof: None,
        method: SettlementMethod::Facilitated,
    };
    req.extensions_mut().insert(context);

    let response = next.run(req).await;

    // Permit rails need an explicit settlement step once the handler has
    // run. The response is already committed, so this is fire-and-forget.
    if response.status().is_success() {
        let remote = Arc::clone(&state.remote);
        let payload = header.payload.clone();
        tokio::spawn(async move {
            match remote.settle(&payload, &requirement).await {
                Ok(outcome) => {
                    tracing::info!(
                        network = %outcome.network,
                        transaction = outcome
                            .transaction
                            .as_deref()
                            .map(truncate_hash)
                            .unwrap_or_default(),
                        payer = %payer,
                        "permit settlement completed"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, payer = %payer, "permit settlement failed after response");
                }
            }
        });
    }

    response
}
