//! Upstream dispatch: the uniform handler behind every paid route.
//!
//! One code path serves the whole catalog. For a verified (or bypassed)
//! request it validates the declared parameters, probes the response cache,
//! rotates a provider credential, performs the retrying outbound call, and
//! projects the upstream JSON into the gateway's stable envelope:
//!
//! ```json
//! {"service": "<id>", "data": <upstream body>, "upstreamStatus": 200}
//! ```
//!
//! Cache hits add `"cached": true`. Request-log rows are enqueued
//! asynchronously and never delay the response.

pub mod client;

pub use client::{UpstreamCallError, UpstreamClient};

use reqwest::Method;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::app::GatewayState;
use crate::errors::GatewayError;
use crate::ledger::RequestLogEntry;
use crate::payment::context::PaymentContext;
use crate::services::{ParamLocation, Service, ServiceMethod};

/// Built-in provider base URLs; `[upstream.providers]` in `config.toml`
/// overrides or extends these.
const DEFAULT_PROVIDER_URLS: [(&str, &str); 9] = [
    ("openweather", "https://api.openweathermap.org"),
    ("coingecko", "https://api.coingecko.com"),
    ("alchemy", "https://api.g.alchemy.com"),
    ("stability", "https://api.stability.ai"),
    ("openai", "https://api.openai.com"),
    ("deepgram", "https://api.deepgram.com"),
    ("elevenlabs", "https://api.elevenlabs.io"),
    ("amadeus", "https://api.amadeus.com"),
    ("pinata", "https://api.pinata.cloud"),
];

/// Resolves a provider tag to its base URL.
pub fn provider_base_url(state: &GatewayState, provider: &str) -> Option<String> {
    if let Some(url) = state.config.upstream.providers.get(provider) {
        return Some(url.clone());
    }
    DEFAULT_PROVIDER_URLS
        .iter()
        .find(|(tag, _)| *tag == provider)
        .map(|(_, url)| url.to_string())
}

/// Checks declared parameters: every required query/body parameter must be
/// present, and body parameters require a JSON object body.
pub fn validate_params(
    service: &Service,
    query: &BTreeMap<String, String>,
    body: Option<&serde_json::Value>,
) -> Result<(), GatewayError> {
    for param in &service.params {
        if !param.required {
            continue;
        }
        let present = match param.location {
            ParamLocation::Query => query.contains_key(&param.name),
            ParamLocation::Body => body
                .and_then(|b| b.as_object())
                .is_some_and(|obj| obj.contains_key(&param.name)),
        };
        if !present {
            return Err(GatewayError::BadRequest(format!(
                "missing required parameter {:?}",
                param.name
            )));
        }
    }
    Ok(())
}

/// Canonical cache key: service id plus sorted query pairs plus the body.
/// `BTreeMap` ordering makes equal inputs collide regardless of the order
/// the client sent them in.
pub fn cache_key(
    service: &Service,
    query: &BTreeMap<String, String>,
    body: Option<&serde_json::Value>,
) -> String {
    let mut key = String::with_capacity(64);
    key.push_str(&service.id);
    for (name, value) in query {
        key.push('\u{1f}');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    if let Some(body) = body {
        key.push('\u{1f}');
        key.push_str(&body.to_string());
    }
    key
}

/// Performs the upstream call for a paid request and returns the projected
/// response body.
pub async fn dispatch(
    state: &GatewayState,
    service: &Service,
    query: &BTreeMap<String, String>,
    body: Option<&serde_json::Value>,
    payment: Option<&PaymentContext>,
) -> Result<serde_json::Value, GatewayError> {
    validate_params(service, query, body)?;

    // Upload routes are additionally gated by a concurrency budget so a
    // burst of large bodies cannot exhaust memory.
    let _upload_permit = if service.category == "ipfs" {
        match state.upload_gate.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                return Err(GatewayError::UpstreamUnavailable {
                    message: "Too many concurrent uploads".to_string(),
                    upstream_status: None,
                });
            }
        }
    } else {
        None
    };

    let key = cache_key(service, query, body);
    if let Some(mut cached) = state.cache.get(&key) {
        if let Some(obj) = cached.as_object_mut() {
            obj.insert("cached".to_string(), serde_json::Value::Bool(true));
        }
        log_dispatch(state, service, payment, Some(200), 0);
        return Ok(cached);
    }

    let Some(secret) = state.credentials.acquire(&service.provider) else {
        return Err(GatewayError::UpstreamNotConfigured(service.provider.clone()));
    };
    let secret = secret.to_string();
    let Some(base_url) = provider_base_url(state, &service.provider) else {
        return Err(GatewayError::UpstreamNotConfigured(service.provider.clone()));
    };

    let method = match service.method {
        ServiceMethod::Get => Method::GET,
        ServiceMethod::Post => Method::POST,
    };
    let url = format!("{}{}", base_url.trim_end_matches('/'), service.path);
    let query_pairs: Vec<(String, String)> =
        query.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let started = Instant::now();
    let result = state
        .upstream
        .call_json(method, &url, &secret, &query_pairs, body)
        .await;
    let latency_ms = started.elapsed().as_millis() as i64;

    let (status, upstream_body) = match result {
        Ok(ok) => ok,
        Err(UpstreamCallError::RetriesExhausted { status, attempts }) => {
            tracing::warn!(service = %service.id, status, attempts, "upstream retries exhausted");
            log_dispatch(state, service, payment, Some(status as i32), latency_ms);
            return Err(GatewayError::UpstreamUnavailable {
                message: "Upstream provider unavailable".to_string(),
                upstream_status: Some(status),
            });
        }
        Err(UpstreamCallError::Transport { attempts, message }) => {
            tracing::warn!(service = %service.id, attempts, message, "upstream transport failure");
            log_dispatch(state, service, payment, None, latency_ms);
            return Err(GatewayError::UpstreamUnavailable {
                message: "Upstream provider unavailable".to_string(),
                upstream_status: None,
            });
        }
    };

    log_dispatch(state, service, payment, Some(status.as_u16() as i32), latency_ms);

    if status.is_success() {
        let projected = serde_json::json!({
            "service": service.id,
            "data": upstream_body,
            "upstreamStatus": status.as_u16(),
        });
        let ttl = state.config.cache.ttl_for(&service.category);
        state.cache.put(key, projected.clone(), ttl);
        return Ok(projected);
    }

    // Client-class upstream failures propagate sanitized; the upstream body
    // is never forwarded.
    match status.as_u16() {
        404 => Err(GatewayError::NotFound),
        401 | 403 => {
            tracing::error!(service = %service.id, %status, "upstream rejected our credentials");
            Err(GatewayError::UpstreamNotConfigured(service.provider.clone()))
        }
        _ => Err(GatewayError::BadRequest(
            "Upstream rejected the request".to_string(),
        )),
    }
}

fn log_dispatch(
    state: &GatewayState,
    service: &Service,
    payment: Option<&PaymentContext>,
    upstream_status: Option<i32>,
    latency_ms: i64,
) {
    let mut entry = RequestLogEntry::new(service.id.clone(), service.path.clone());
    if let Some(payment) = payment {
        entry.payer = Some(payment.payer.clone());
        entry.network = Some(payment.network.to_string());
        entry.amount = Some(payment.amount.to_string());
        entry.scheme = Some("exact".to_string());
    }
    entry.upstream_status = upstream_status;
    entry.latency_ms = latency_ms;
    state.log_queue.enqueue(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ParamSpec;

    fn service_with_params(params: Vec<ParamSpec>) -> Service {
        Service {
            id: "svc".to_string(),
            display_name: "Svc".to_string(),
            description: "test".to_string(),
            price: "0.001".to_string(),
            method: ServiceMethod::Get,
            path: "/api/svc".to_string(),
            provider: "p".to_string(),
            cost_estimate: None,
            params,
            mime_type: "application/json".to_string(),
            category: "misc".to_string(),
        }
    }

    #[test]
    fn test_required_query_param() {
        let service = service_with_params(vec![ParamSpec {
            name: "q".to_string(),
            location: ParamLocation::Query,
            required: true,
        }]);
        let mut query = BTreeMap::new();
        assert!(validate_params(&service, &query, None).is_err());
        query.insert("q".to_string(), "London".to_string());
        assert!(validate_params(&service, &query, None).is_ok());
    }

    #[test]
    fn test_required_body_param() {
        let service = service_with_params(vec![ParamSpec {
            name: "prompt".to_string(),
            location: ParamLocation::Body,
            required: true,
        }]);
        let query = BTreeMap::new();
        assert!(validate_params(&service, &query, None).is_err());
        let body = serde_json::json!({"prompt": "hello"});
        assert!(validate_params(&service, &query, Some(&body)).is_ok());
        let wrong = serde_json::json!({"other": 1});
        assert!(validate_params(&service, &query, Some(&wrong)).is_err());
    }

    #[test]
    fn test_optional_params_not_enforced() {
        let service = service_with_params(vec![ParamSpec {
            name: "vs".to_string(),
            location: ParamLocation::Query,
            required: false,
        }]);
        assert!(validate_params(&service, &BTreeMap::new(), None).is_ok());
    }

    #[test]
    fn test_cache_key_is_order_insensitive() {
        let service = service_with_params(vec![]);
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), "1".to_string());
        a.insert("y".to_string(), "2".to_string());
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), "2".to_string());
        b.insert("x".to_string(), "1".to_string());
        assert_eq!(cache_key(&service, &a, None), cache_key(&service, &b, None));
    }

    #[test]
    fn test_cache_key_differs_by_inputs() {
        let service = service_with_params(vec![]);
        let mut a = BTreeMap::new();
        a.insert("q".to_string(), "London".to_string());
        let mut b = BTreeMap::new();
        b.insert("q".to_string(), "Paris".to_string());
        assert_ne!(cache_key(&service, &a, None), cache_key(&service, &b, None));

        let body = serde_json::json!({"prompt": "hi"});
        assert_ne!(
            cache_key(&service, &a, None),
            cache_key(&service, &a, Some(&body))
        );
    }

    #[test]
    fn test_default_provider_table() {
        assert!(DEFAULT_PROVIDER_URLS
            .iter()
            .any(|(tag, _)| *tag == "openweather"));
        // Tags are unique.
        let mut tags: Vec<&str> = DEFAULT_PROVIDER_URLS.iter().map(|(t, _)| *t).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), DEFAULT_PROVIDER_URLS.len());
    }
}
