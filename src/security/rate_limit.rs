//! Tiered per-client rate limiting.
//!
//! Three policies keyed by route class: free (discovery, health), paid
//! (ordinary priced routes), and expensive (compute-heavy routes). Each
//! client IP gets a sliding one-minute window per tier. Rejection is a
//! 429 JSON error with a `RateLimit-Limit` header.
//!
//! Client identity comes from `x-forwarded-for` / `x-real-ip` when present
//! (the gateway normally runs behind a proxy), falling back to the peer
//! address.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::RateLimitingConfig;
use crate::errors::GatewayError;

/// Route classes with distinct budgets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RateTier {
    Free,
    Paid,
    Expensive,
}

/// Categories whose upstream work is expensive enough for the tight tier.
const EXPENSIVE_CATEGORIES: [&str; 4] = ["image", "llm", "video", "code"];

impl RateTier {
    /// Classifies a request path. Paths outside `/api/` are free;
    /// expensive categories are matched on their path segment.
    pub fn for_path(path: &str) -> RateTier {
        let Some(rest) = path.strip_prefix("/api/") else {
            return RateTier::Free;
        };
        let segment = rest.split('/').next().unwrap_or("");
        if segment == "services" {
            return RateTier::Free;
        }
        if EXPENSIVE_CATEGORIES.contains(&segment) {
            RateTier::Expensive
        } else {
            RateTier::Paid
        }
    }
}

/// Sliding-window limiter over a concurrent map of per-(ip, tier) histories.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitingConfig>,
    history: Arc<DashMap<(IpAddr, RateTier), Vec<SystemTime>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitingConfig) -> Self {
        Self {
            config: Arc::new(config),
            history: Arc::new(DashMap::new()),
        }
    }

    fn limit_for(&self, tier: RateTier) -> u32 {
        match tier {
            RateTier::Free => self.config.free_per_minute,
            RateTier::Paid => self.config.paid_per_minute,
            RateTier::Expensive => self.config.expensive_per_minute,
        }
    }

    fn is_whitelisted(&self, ip: &IpAddr) -> bool {
        self.config
            .whitelisted_ips
            .iter()
            .any(|network| network.contains(*ip))
    }

    /// Records a hit and reports whether the window budget is exceeded.
    fn should_reject(&self, ip: IpAddr, tier: RateTier) -> bool {
        let now = SystemTime::now();
        let window = Duration::from_secs(60);
        let limit = self.limit_for(tier) as usize;

        let mut history = self.history.entry((ip, tier)).or_default();
        history
            .value_mut()
            .retain(|&t| now.duration_since(t).unwrap_or_default() < window);

        if history.value().len() >= limit {
            return true;
        }
        history.value_mut().push(now);
        false
    }

    /// Middleware entry point.
    pub async fn middleware(&self, req: Request, next: Next) -> Response {
        if !self.config.enabled {
            return next.run(req).await;
        }
        let Some(ip) = extract_client_ip(&req) else {
            tracing::warn!("could not determine client IP; admitting request");
            return next.run(req).await;
        };
        if self.is_whitelisted(&ip) {
            return next.run(req).await;
        }

        let tier = RateTier::for_path(req.uri().path());
        if self.should_reject(ip, tier) {
            tracing::warn!(ip = %ip, tier = ?tier, "rate limit exceeded");
            return GatewayError::RateLimited {
                limit: self.limit_for(tier),
            }
            .into_response();
        }
        next.run(req).await
    }

    /// Drops windows that have gone idle. Called periodically.
    pub fn cleanup(&self) {
        let now = SystemTime::now();
        let window = Duration::from_secs(60);
        self.history.retain(|_, timestamps| {
            timestamps.retain(|&t| now.duration_since(t).unwrap_or_default() < window);
            !timestamps.is_empty()
        });
    }
}

/// Client IP: `x-forwarded-for` first entry, then `x-real-ip`, then the
/// peer address.
fn extract_client_ip(req: &Request<Body>) -> Option<IpAddr> {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse() {
                    return Some(ip);
                }
            }
        }
    }
    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.parse() {
                return Some(ip);
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(free: u32, paid: u32, expensive: u32) -> RateLimiter {
        RateLimiter::new(RateLimitingConfig {
            enabled: true,
            free_per_minute: free,
            paid_per_minute: paid,
            expensive_per_minute: expensive,
            whitelisted_ips: vec![],
        })
    }

    fn ip() -> IpAddr {
        "192.0.2.7".parse().unwrap()
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(RateTier::for_path("/health"), RateTier::Free);
        assert_eq!(RateTier::for_path("/.well-known/x402.json"), RateTier::Free);
        assert_eq!(RateTier::for_path("/api/services"), RateTier::Free);
        assert_eq!(RateTier::for_path("/api/weather/current"), RateTier::Paid);
        assert_eq!(RateTier::for_path("/api/travel/flights"), RateTier::Paid);
        assert_eq!(RateTier::for_path("/api/image/generate"), RateTier::Expensive);
        assert_eq!(RateTier::for_path("/api/llm/chat"), RateTier::Expensive);
        assert_eq!(RateTier::for_path("/api/code/complete"), RateTier::Expensive);
    }

    #[test]
    fn test_n_plus_one_rejected() {
        let limiter = limiter(60, 300, 3);
        for _ in 0..3 {
            assert!(!limiter.should_reject(ip(), RateTier::Expensive));
        }
        // Request N+1 in the window is refused.
        assert!(limiter.should_reject(ip(), RateTier::Expensive));
    }

    #[test]
    fn test_tiers_are_independent() {
        let limiter = limiter(60, 300, 1);
        assert!(!limiter.should_reject(ip(), RateTier::Expensive));
        assert!(limiter.should_reject(ip(), RateTier::Expensive));
        // The paid tier still has budget for the same client.
        assert!(!limiter.should_reject(ip(), RateTier::Paid));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = limiter(60, 1, 10);
        let other: IpAddr = "192.0.2.8".parse().unwrap();
        assert!(!limiter.should_reject(ip(), RateTier::Paid));
        assert!(limiter.should_reject(ip(), RateTier::Paid));
        assert!(!limiter.should_reject(other, RateTier::Paid));
    }

    #[test]
    fn test_whitelist() {
        let limiter = RateLimiter::new(RateLimitingConfig {
            enabled: true,
            free_per_minute: 1,
            paid_per_minute: 1,
            expensive_per_minute: 1,
            whitelisted_ips: vec!["192.0.2.0/24".parse().unwrap()],
        });
        assert!(limiter.is_whitelisted(&ip()));
        assert!(!limiter.is_whitelisted(&"198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn test_cleanup_drops_idle_windows() {
        let limiter = limiter(60, 300, 10);
        limiter.should_reject(ip(), RateTier::Paid);
        assert_eq!(limiter.history.len(), 1);
        // Entries inside the window survive cleanup.
        limiter.cleanup();
        assert_eq!(limiter.history.len(), 1);
    }
}
