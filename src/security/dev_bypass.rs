//! Dev bypass gate.
//!
//! When the environment enables it, a request presenting the configured
//! secret in the `x-dev-bypass` header skips all payment middlewares. The
//! comparison is constant-time so the header cannot be brute-forced
//! byte-by-byte through timing. Bypassed responses carry a prominent
//! `x-dev-bypass: active` header.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::app::GatewayState;
use crate::payment::context::DevBypassed;

/// Header clients present the bypass secret in.
pub const DEV_BYPASS_HEADER: &str = "x-dev-bypass";

/// Constant-time equality over byte strings. Always walks the longer of
/// the two inputs; the comparison result accumulates into a single flag.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn dev_bypass_middleware(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(secret) = state
        .dev_bypass
        .is_active()
        .then(|| state.dev_bypass.secret.as_deref())
        .flatten()
    else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(DEV_BYPASS_HEADER)
        .and_then(|v| v.to_str().ok());
    let matched = presented
        .map(|candidate| constant_time_eq(candidate.as_bytes(), secret.as_bytes()))
        .unwrap_or(false);

    if !matched {
        return next.run(req).await;
    }

    tracing::warn!(path = req.uri().path(), "dev bypass used; payment skipped");
    req.extensions_mut().insert(DevBypassed);
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        DEV_BYPASS_HEADER,
        "active".parse().expect("static header value"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
        assert!(!constant_time_eq(b"secret", b"Secret"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(!constant_time_eq(b"abc", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abc"));
    }
}
