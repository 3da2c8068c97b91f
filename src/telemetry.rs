//! Tracing setup.
//!
//! Structured logging via `tracing`, filtered by `RUST_LOG` (default
//! `info`), plus an HTTP trace layer for per-request spans.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Service identity attached to startup logs.
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: "gateway",
            version: "0.0.0",
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global subscriber. Call once, at startup.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
        tracing::info!(name = self.name, version = self.version, "telemetry initialized");
        self
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
