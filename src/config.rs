//! Gateway configuration.
//!
//! Two layers, loaded at startup:
//! - **Required environment** ([`RequiredEnv`]): database URL, recipient
//!   addresses, fast-rail RPC endpoint and stablecoin contract, external
//!   facilitator URL. A missing value aborts startup with a non-zero exit.
//! - **Tunables** ([`GatewayConfig`]): rate limits, timeout table, retry
//!   policy, pool sizes, cache TTLs. Read from an optional `config.toml`
//!   and defaulting to production values when absent.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Error raised when required configuration is absent or unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {message}")]
    InvalidEnv { name: &'static str, message: String },
    #[error(transparent)]
    File(#[from] config::ConfigError),
}

/// Required environment, without which the gateway refuses to start.
#[derive(Debug, Clone)]
pub struct RequiredEnv {
    /// Postgres connection string for the ledger.
    pub database_url: String,
    /// Recipient address shared by the EVM rails (MegaETH and Base).
    pub evm_pay_to: String,
    /// Recipient address on Solana.
    pub solana_pay_to: String,
    /// Fast-rail RPC endpoint.
    pub megaeth_rpc_url: String,
    /// Fast-rail stablecoin contract address.
    pub megaeth_usd_contract: String,
    /// Base URL of the external facilitator serving the permit rails.
    pub facilitator_url: String,
}

impl RequiredEnv {
    /// Reads the required variables, failing on the first absent one.
    pub fn from_env() -> Result<Self, ConfigError> {
        fn require(name: &'static str) -> Result<String, ConfigError> {
            match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::MissingEnv(name)),
            }
        }

        let evm_pay_to = require("EVM_PAY_TO")?;
        if !looks_like_evm_address(&evm_pay_to) {
            return Err(ConfigError::InvalidEnv {
                name: "EVM_PAY_TO",
                message: "expected 0x-prefixed 40-hex-char address".to_string(),
            });
        }

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            evm_pay_to,
            solana_pay_to: require("SOLANA_PAY_TO")?,
            megaeth_rpc_url: require("MEGAETH_RPC_URL")?,
            megaeth_usd_contract: require("MEGAETH_USD_CONTRACT")?,
            facilitator_url: require("FACILITATOR_URL")?,
        })
    }
}

fn looks_like_evm_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Dev-bypass configuration. Active only when `DEV_MODE=true` and a secret
/// is configured.
#[derive(Debug, Clone, Default)]
pub struct DevBypass {
    pub enabled: bool,
    pub secret: Option<String>,
}

impl DevBypass {
    pub fn from_env() -> Self {
        let enabled = std::env::var("DEV_MODE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        let secret = std::env::var("DEV_BYPASS_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if enabled && secret.is_some() {
            tracing::warn!("dev bypass is ACTIVE; payment middlewares can be skipped");
        }
        Self { enabled, secret }
    }

    /// True when both the flag and the secret are present.
    pub fn is_active(&self) -> bool {
        self.enabled && self.secret.is_some()
    }
}

/// Complete tunable configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub rate_limiting: RateLimitingConfig,
    pub request: RequestConfig,
    pub timeouts: TimeoutConfig,
    pub ledger: LedgerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file; absent file means defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Ok(config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?)
    }

    /// Load from the path in `CONFIG_FILE`, defaulting to `config.toml`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(path)
    }
}

/// Per-tier rate limits (requests per minute per client).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    /// Health, discovery, landing pages.
    pub free_per_minute: u32,
    /// Ordinary paid routes.
    pub paid_per_minute: u32,
    /// Compute-heavy routes (image, llm, video).
    pub expensive_per_minute: u32,
    /// CIDRs exempt from rate limiting.
    #[serde(with = "ip_list_serde")]
    pub whitelisted_ips: Vec<IpNetwork>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            free_per_minute: 60,
            paid_per_minute: 300,
            expensive_per_minute: 10,
            whitelisted_ips: vec![],
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Default maximum request body size in bytes.
    pub max_body_size_bytes: usize,
    /// Body cap for transcription uploads.
    pub transcribe_body_size_bytes: usize,
    /// Simultaneous file-upload requests admitted before shedding.
    pub max_concurrent_uploads: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_body_size_bytes: 1_048_576,             // 1 MB
            transcribe_body_size_bytes: 50 * 1_048_576, // 50 MB
            max_concurrent_uploads: 5,
        }
    }
}

/// Per-path-prefix request deadlines, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_seconds: u64,
    /// Longest-prefix overrides keyed by path prefix.
    pub prefixes: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let mut prefixes = HashMap::new();
        prefixes.insert("/api/llm".to_string(), 180);
        prefixes.insert("/api/video".to_string(), 300);
        prefixes.insert("/api/image".to_string(), 90);
        prefixes.insert("/api/tts".to_string(), 90);
        prefixes.insert("/api/transcribe".to_string(), 90);
        prefixes.insert("/api/code".to_string(), 90);
        prefixes.insert("/api/travel".to_string(), 60);
        prefixes.insert("/api/ipfs".to_string(), 60);
        Self {
            default_seconds: 30,
            prefixes,
        }
    }
}

impl TimeoutConfig {
    /// Resolves the deadline for a request path via longest matching prefix.
    pub fn deadline_for(&self, path: &str) -> Duration {
        let seconds = self
            .prefixes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, secs)| *secs)
            .unwrap_or(self.default_seconds);
        Duration::from_secs(seconds)
    }
}

/// Ledger pool and request-log flusher tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// Request-log flush cadence.
    pub flush_interval_ms: u64,
    /// Request-log batch size triggering an early flush.
    pub flush_batch_size: usize,
    /// Retention window enforced by the daily cleanup job.
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 600,
            flush_interval_ms: 2000,
            flush_batch_size: 50,
            retention_days: 90,
        }
    }
}

/// Upstream dispatcher tuning: provider base URLs and the retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// provider tag → base URL. Entries here override the built-in table.
    pub providers: HashMap<String, String>,
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Fast-rail receipt fetch deadline.
    pub rpc_timeout_seconds: u64,
    /// External facilitator call deadline.
    pub facilitator_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            request_timeout_seconds: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            rpc_timeout_seconds: 15,
            facilitator_timeout_seconds: 20,
        }
    }
}

/// Response-cache TTLs per service category, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    pub categories: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut categories = HashMap::new();
        categories.insert("market".to_string(), 30);
        categories.insert("nft".to_string(), 300);
        categories.insert("location".to_string(), 3600);
        Self {
            default_ttl_seconds: 60,
            categories,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, category: &str) -> Duration {
        Duration::from_secs(
            self.categories
                .get(category)
                .copied()
                .unwrap_or(self.default_ttl_seconds),
        )
    }
}

/// Parses provider secrets of the form `PROVIDER_KEY_<TAG>` from the
/// environment. Values may be a single secret or a comma-separated list.
pub fn provider_secrets_from_env() -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    for (key, value) in std::env::vars() {
        if let Some(tag) = key.strip_prefix("PROVIDER_KEY_") {
            let secrets: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !secrets.is_empty() {
                out.insert(tag.to_lowercase(), secrets);
            }
        }
    }
    out
}

/// Custom serde module for CIDR lists in TOML.
mod ip_list_serde {
    use ipnetwork::IpNetwork;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(ips: &Vec<IpNetwork>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<String> = ips.iter().map(|ip| ip.to_string()).collect();
        serializer.collect_seq(strings)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<IpNetwork>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| IpNetwork::from_str(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.free_per_minute, 60);
        assert_eq!(config.rate_limiting.paid_per_minute, 300);
        assert_eq!(config.rate_limiting.expensive_per_minute, 10);
        assert_eq!(config.request.max_body_size_bytes, 1_048_576);
        assert_eq!(config.ledger.max_connections, 50);
        assert_eq!(config.ledger.flush_batch_size, 50);
    }

    #[test]
    fn test_timeout_table() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(
            timeouts.deadline_for("/api/llm/chat"),
            Duration::from_secs(180)
        );
        assert_eq!(
            timeouts.deadline_for("/api/video/generate"),
            Duration::from_secs(300)
        );
        assert_eq!(
            timeouts.deadline_for("/api/image/generate"),
            Duration::from_secs(90)
        );
        assert_eq!(
            timeouts.deadline_for("/api/ipfs/pin"),
            Duration::from_secs(60)
        );
        assert_eq!(
            timeouts.deadline_for("/api/weather/current"),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_cache_ttls() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_for("market"), Duration::from_secs(30));
        assert_eq!(cache.ttl_for("nft"), Duration::from_secs(300));
        assert_eq!(cache.ttl_for("location"), Duration::from_secs(3600));
        assert_eq!(cache.ttl_for("weather"), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_toml_overrides() {
        let config_str = r#"
[rate_limiting]
expensive_per_minute = 5
whitelisted_ips = ["10.0.0.0/8"]

[timeouts.prefixes]
"/api/llm" = 240
"#;
        let config: GatewayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.rate_limiting.expensive_per_minute, 5);
        assert_eq!(config.rate_limiting.whitelisted_ips.len(), 1);
        assert_eq!(
            config.timeouts.deadline_for("/api/llm/chat"),
            Duration::from_secs(240)
        );
        // Untouched sections keep defaults.
        assert_eq!(config.ledger.max_connections, 50);
    }

    #[test]
    fn test_evm_address_shape() {
        assert!(looks_like_evm_address(
            "0x1111111111111111111111111111111111111111"
        ));
        assert!(!looks_like_evm_address("0x123"));
        assert!(!looks_like_evm_address(
            "1111111111111111111111111111111111111111zz"
        ));
    }
}
