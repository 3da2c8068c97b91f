//! Per-path request deadlines.
//!
//! Each path class gets a deadline from the timeout table (LLM routes wait
//! minutes, market lookups seconds). The whole downstream stack — payment
//! verification, upstream dispatch — runs under one `tokio::time::timeout`;
//! expiry drops the in-flight future, cancelling outbound I/O at its next
//! suspension point, and answers 408 with the configured and elapsed times.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;

use crate::app::GatewayState;
use crate::errors::GatewayError;

pub async fn timeout_middleware(
    State(state): State<Arc<GatewayState>>,
    req: Request,
    next: Next,
) -> Response {
    let deadline = state.config.timeouts.deadline_for(req.uri().path());
    let path = req.uri().path().to_string();
    let started = Instant::now();

    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::warn!(
                path,
                timeout_ms = deadline.as_millis() as u64,
                elapsed_ms,
                "request deadline expired"
            );
            GatewayError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
                elapsed_ms,
            }
            .into_response()
        }
    }
}
