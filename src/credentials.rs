//! Per-provider credential pool with round-robin rotation.
//!
//! Providers are registered once at startup from environment secrets;
//! after that the pool is read-only apart from the rotation cursor, which
//! is an atomic counter per provider. Under contention the rotation is
//! monotone rather than perfectly fair, which is sufficient — every secret
//! stays reachable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

struct ProviderEntry {
    secrets: Vec<String>,
    cursor: AtomicUsize,
    acquires: AtomicUsize,
}

/// Round-robin pool of upstream API credentials keyed by provider tag.
#[derive(Default)]
pub struct CredentialPool {
    providers: HashMap<String, ProviderEntry>,
}

/// Per-provider observability snapshot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProviderStats {
    pub count: usize,
    pub acquires: usize,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from a `provider → secrets` table, e.g. the output of
    /// [`crate::config::provider_secrets_from_env`].
    pub fn from_secrets(secrets: HashMap<String, Vec<String>>) -> Self {
        let mut pool = Self::new();
        for (tag, list) in secrets {
            pool.register(&tag, list);
        }
        pool
    }

    /// Registers a provider's secrets. Empty strings are dropped; if nothing
    /// remains the call is a no-op and the provider stays unknown.
    pub fn register(&mut self, provider: &str, secrets: Vec<String>) {
        let secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        if secrets.is_empty() {
            tracing::warn!(provider, "no usable secrets; provider not registered");
            return;
        }
        tracing::info!(provider, count = secrets.len(), "registered provider credentials");
        self.providers.insert(
            provider.to_string(),
            ProviderEntry {
                secrets,
                cursor: AtomicUsize::new(0),
                acquires: AtomicUsize::new(0),
            },
        );
    }

    /// Returns the next secret for a provider, advancing the rotation.
    /// `None` if the provider is unknown.
    pub fn acquire(&self, provider: &str) -> Option<&str> {
        let entry = self.providers.get(provider)?;
        entry.acquires.fetch_add(1, Ordering::Relaxed);
        let index = if entry.secrets.len() == 1 {
            0
        } else {
            entry.cursor.fetch_add(1, Ordering::Relaxed) % entry.secrets.len()
        };
        Some(&entry.secrets[index])
    }

    /// True if the provider has at least one secret.
    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Snapshot of counts and acquire totals per provider.
    pub fn stats(&self) -> HashMap<String, ProviderStats> {
        self.providers
            .iter()
            .map(|(tag, entry)| {
                (
                    tag.clone(),
                    ProviderStats {
                        count: entry.secrets.len(),
                        acquires: entry.acquires.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}
