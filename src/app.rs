//! Pipeline assembly: shared state and the fixed middleware stack.
//!
//! Layer order, outermost first: panic catcher → request tracing → CORS →
//! request-id → rate limiter → timeout enforcer → body cap. Free routes
//! stop there; priced routes additionally pass dev bypass → fast-rail
//! payment → permit payment before reaching the dispatch handler, which
//! 402-advertises anything still unpaid.

use axum::http::{header, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::{self, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::advertise::{Advertiser, PAYMENT_REQUIRED_HEADER};
use crate::cache::TtlCache;
use crate::config::{DevBypass, GatewayConfig, RequiredEnv};
use crate::credentials::CredentialPool;
use crate::facilitator_fast::FastRailFacilitator;
use crate::facilitator_http::RemoteFacilitator;
use crate::handlers;
use crate::ledger::log_queue::RequestLogQueue;
use crate::ledger::Ledger;
use crate::network::ChainRegistry;
use crate::payment::fast::fast_rail_middleware;
use crate::payment::permit::permit_rail_middleware;
use crate::security::dev_bypass::dev_bypass_middleware;
use crate::security::rate_limit::RateLimiter;
use crate::security::timeout::timeout_middleware;
use crate::services::{ServiceMethod, ServiceRegistry};
use crate::upstream::UpstreamClient;

/// Everything a request handler can reach, shared behind one `Arc`.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub chains: ChainRegistry,
    pub services: ServiceRegistry,
    pub advertiser: Advertiser,
    pub ledger: Ledger,
    pub log_queue: RequestLogQueue,
    pub credentials: CredentialPool,
    pub cache: TtlCache,
    pub fast: FastRailFacilitator,
    pub remote: Arc<RemoteFacilitator>,
    pub upstream: UpstreamClient,
    pub rate_limiter: RateLimiter,
    pub dev_bypass: DevBypass,
    pub upload_gate: Arc<Semaphore>,
    pub wellknown: serde_json::Value,
}

/// Builds the shared state: connects the ledger, initializes the fast-rail
/// verifier, loads the catalog and credentials, and precomputes the
/// discovery document.
pub async fn build_state(
    config: GatewayConfig,
    env: RequiredEnv,
) -> Result<Arc<GatewayState>, Box<dyn std::error::Error + Send + Sync>> {
    let chains = ChainRegistry::new(
        env.evm_pay_to,
        env.solana_pay_to,
        env.megaeth_rpc_url.clone(),
        env.megaeth_usd_contract.clone(),
    );
    let services = ServiceRegistry::from_env()?;
    let advertiser = Advertiser::new(chains.clone());

    let ledger = Ledger::connect(&env.database_url, &config.ledger).await?;
    let log_queue = RequestLogQueue::new(config.ledger.flush_batch_size);

    let fast_chain = chains.fast_rail();
    let verifier = Arc::new(crate::chain::ReceiptVerifier::new(
        &env.megaeth_rpc_url,
        &env.megaeth_usd_contract,
        fast_chain.chain_id.clone(),
        std::time::Duration::from_secs(config.upstream.rpc_timeout_seconds),
    )?);
    let fast = FastRailFacilitator::new(verifier, ledger.clone());

    let remote = Arc::new(RemoteFacilitator::new(
        env.facilitator_url,
        std::time::Duration::from_secs(config.upstream.facilitator_timeout_seconds),
    )?);

    let credentials = CredentialPool::from_secrets(crate::config::provider_secrets_from_env());
    let upstream = UpstreamClient::new(&config.upstream)?;
    let rate_limiter = RateLimiter::new(config.rate_limiting.clone());
    let dev_bypass = DevBypass::from_env();
    let upload_gate = Arc::new(Semaphore::new(config.request.max_concurrent_uploads));
    let wellknown = build_wellknown(&chains, &services);

    Ok(Arc::new(GatewayState {
        config,
        chains,
        services,
        advertiser,
        ledger,
        log_queue,
        credentials,
        cache: TtlCache::new(),
        fast,
        remote,
        upstream,
        rate_limiter,
        dev_bypass,
        upload_gate,
        wellknown,
    }))
}

/// The `/.well-known/x402.json` document: stable shape, computed once.
fn build_wellknown(chains: &ChainRegistry, services: &ServiceRegistry) -> serde_json::Value {
    let networks: serde_json::Map<String, serde_json::Value> = chains
        .all()
        .iter()
        .map(|chain| {
            (
                chain.network.to_string(),
                json!({
                    "caip2": chain.chain_id.to_string(),
                    "displayName": chain.display_name,
                    "stablecoin": chain.stablecoin,
                    "blockTimeMs": chain.block_time_ms,
                    "payTo": chain.pay_to,
                }),
            )
        })
        .collect();

    let service_summaries: Vec<serde_json::Value> = services
        .all()
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "displayName": s.display_name,
                "price": s.price,
                "method": s.method.as_str(),
                "path": s.path,
                "category": s.category,
            })
        })
        .collect();

    let routes: serde_json::Map<String, serde_json::Value> = services
        .all()
        .iter()
        .map(|s| {
            (
                format!("{} {}", s.method.as_str(), s.path),
                json!(s.id),
            )
        })
        .collect();

    let mut categories: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
    for category in services.categories() {
        let ids: Vec<&str> = services
            .all()
            .iter()
            .filter(|s| s.category == category)
            .map(|s| s.id.as_str())
            .collect();
        categories.insert(category, json!(ids));
    }

    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "x402Version": 2,
        "networks": networks,
        "services": service_summaries,
        "routes": routes,
        "categories": categories,
        "hint": "Request any priced route without payment to receive a 402 quote; \
                 then retry with a payment-signature or x-payment header.",
    })
}

/// Assembles the full router with the fixed middleware order.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let free_routes = Router::new()
        .route("/", get(handlers::get_root))
        .route("/health", get(handlers::get_health))
        .route("/.well-known/x402.json", get(handlers::get_wellknown))
        .route("/api/services", get(handlers::get_services))
        .route("/api/services/{id}", get(handlers::get_service))
        .route(
            "/facilitator/megaeth/supported",
            get(handlers::facilitator_supported),
        )
        .route(
            "/facilitator/megaeth/verify",
            post(handlers::facilitator_verify),
        )
        .route(
            "/facilitator/megaeth/settle",
            post(handlers::facilitator_settle),
        )
        .route(
            "/facilitator/megaeth/status",
            get(handlers::facilitator_status),
        )
        .with_state(Arc::clone(&state));

    // Every priced route funnels into the dispatch handler; the payment
    // stack wraps only these routes, dev bypass outermost so a bypassed
    // request skips both payment middlewares.
    let mut paid_routes = Router::new();
    for service in state.services.all() {
        let route = match service.method {
            ServiceMethod::Get => get(handlers::dispatch_paid_route),
            ServiceMethod::Post => post(handlers::dispatch_paid_route),
        };
        paid_routes = paid_routes.route(&service.path, route);
    }
    let paid_routes = paid_routes
        .layer(
            tower::ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    dev_bypass_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    fast_rail_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&state),
                    permit_rail_middleware,
                )),
        )
        .with_state(Arc::clone(&state));

    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(cors::Any)
        .expose_headers([
            PAYMENT_REQUIRED_HEADER
                .parse::<header::HeaderName>()
                .expect("static header name"),
        ]);

    // Transport-level backstop; per-route caps are enforced when the
    // dispatch handler reads the body.
    let body_cap_layer =
        RequestBodyLimitLayer::new(state.config.request.transcribe_body_size_bytes);

    let rate_state = Arc::clone(&state);
    let timeout_state = Arc::clone(&state);

    Router::new()
        .merge(free_routes)
        .merge(paid_routes)
        .layer(
            tower::ServiceBuilder::new()
            .layer(tower_http::catch_panic::CatchPanicLayer::custom(
                panic_response,
            ))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(cors_layer)
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn(
                move |req: axum::extract::Request, next: middleware::Next| {
                    let limiter = rate_state.rate_limiter.clone();
                    async move { limiter.middleware(req, next).await }
                },
            ))
            .layer(middleware::from_fn_with_state(
                timeout_state,
                timeout_middleware,
            ))
            .layer(body_cap_layer),
        )
}

/// Tail handler for anything that panics downstream.
fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(json!({"error": "Internal error", "retryable": true})),
    )
        .into_response();
    response
        .headers_mut()
        .insert("Retry-After", "5".parse().expect("static header value"));
    response
}

/// Assigns every request a UUID, echoed in the `x-request-id` response
/// header and usable in downstream tracing.
async fn request_id_middleware(
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let id = uuid::Uuid::new_v4();
    req.extensions_mut().insert(RequestId(id));
    let mut response = next.run(req).await;
    if let Ok(value) = id.to_string().parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Request-scoped identifier.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub uuid::Uuid);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wellknown_shape() {
        let chains = ChainRegistry::new(
            "0x1111111111111111111111111111111111111111".to_string(),
            "7hQxnCfyqyPNjdhL5DCAyBJDHjVUsYBkqLcVRRHCmVuq".to_string(),
            "https://carrot.megaeth.com/rpc".to_string(),
            "0x2222222222222222222222222222222222222222".to_string(),
        );
        let services =
            ServiceRegistry::from_json(include_str!("../services.json")).unwrap();
        let doc = build_wellknown(&chains, &services);

        assert_eq!(doc["x402Version"], 2);
        assert!(doc["networks"]["megaeth"]["caip2"] == "eip155:6342");
        assert!(doc["networks"]["base"].is_object());
        assert!(doc["networks"]["solana"].is_object());
        assert!(!doc["services"].as_array().unwrap().is_empty());
        assert_eq!(doc["routes"]["GET /api/weather/current"], "weather-current");
        assert!(doc["categories"]["weather"].as_array().is_some());
        assert!(doc["hint"].is_string());
    }
}
