//! Durable ledger: request log and used-payment-proof set.
//!
//! Two Postgres tables back the gateway's persistent state:
//! - `requests` — append-only request log, written in batches by the
//!   background flusher in [`log_queue`].
//! - `used_tx_hashes` — the anti-replay set. The primary key on `tx_hash`
//!   is the serialization point: of two concurrent verifiers racing on the
//!   same proof, exactly one insert succeeds.
//!
//! Replay detection deliberately lives here rather than in memory so it
//! survives restarts and is shared by horizontal replicas.

pub mod log_queue;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::network::ChainId;

/// One row of the append-only request log.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub service: String,
    pub endpoint: String,
    pub payer: Option<String>,
    pub network: Option<String>,
    /// Base units, decimal string.
    pub amount: Option<String>,
    pub scheme: Option<String>,
    pub upstream_status: Option<i32>,
    pub latency_ms: i64,
}

impl RequestLogEntry {
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            endpoint: endpoint.into(),
            payer: None,
            network: None,
            amount: None,
            scheme: None,
            upstream_status: None,
            latency_ms: 0,
        }
    }
}

/// Aggregate counters surfaced on the status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStats {
    /// Approximate row count from the storage catalog, not a table scan.
    pub total_requests: i64,
    pub total_used_proofs: i64,
    /// Exact bounded counts over the trailing day.
    pub requests_last_day: i64,
    pub proofs_last_day: i64,
}

/// Handle to the Postgres-backed ledger.
#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    /// Connects the pool and creates the schema if it does not exist.
    pub async fn connect(database_url: &str, config: &LedgerConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(database_url)
            .await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id UUID PRIMARY KEY,
                service TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                payer TEXT,
                network TEXT,
                amount TEXT,
                scheme TEXT,
                upstream_status INTEGER,
                latency_ms BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_service ON requests (service)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests (created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_payer ON requests (payer)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS used_tx_hashes (
                tx_hash TEXT PRIMARY KEY,
                payer TEXT NOT NULL,
                amount TEXT NOT NULL,
                network TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_used_tx_hashes_created_at ON used_tx_hashes (created_at)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("ledger schema ready");
        Ok(())
    }

    /// Records a payment proof. Returns `true` iff this call inserted the
    /// row — i.e. the proof was accepted for the first time. A conflict on
    /// the primary key returns `false`: replay detected.
    ///
    /// This boolean is the sole admission authority; [`Self::is_proof_used`]
    /// is only a fast-path probe.
    pub async fn record_proof(
        &self,
        proof_key: &str,
        payer: &str,
        amount: &str,
        network: &ChainId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO used_tx_hashes (tx_hash, payer, amount, network)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(proof_key)
        .bind(payer)
        .bind(amount)
        .bind(network.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Non-locking existence probe used before paying the RPC cost of a
    /// full verification. Never the source of truth for admission.
    pub async fn is_proof_used(&self, proof_key: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM used_tx_hashes WHERE tx_hash = $1")
            .bind(proof_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Inserts a batch of request-log rows in one multi-row statement.
    pub async fn insert_request_batch(
        &self,
        entries: &[RequestLogEntry],
    ) -> Result<(), sqlx::Error> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO requests (id, service, endpoint, payer, network, amount, scheme, upstream_status, latency_ms) ",
        );
        builder.push_values(entries, |mut b, entry| {
            b.push_bind(entry.id)
                .push_bind(&entry.service)
                .push_bind(&entry.endpoint)
                .push_bind(&entry.payer)
                .push_bind(&entry.network)
                .push_bind(&entry.amount)
                .push_bind(&entry.scheme)
                .push_bind(entry.upstream_status)
                .push_bind(entry.latency_ms);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Totals from the storage catalog's row estimates plus exact counts
    /// bounded to the trailing day. Never a sequential scan of the full log.
    pub async fn stats(&self) -> Result<LedgerStats, sqlx::Error> {
        let total_requests: i64 = sqlx::query(
            "SELECT COALESCE(reltuples::bigint, 0) AS estimate FROM pg_class WHERE relname = 'requests'",
        )
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.get("estimate"))
        .unwrap_or(0);

        let total_used_proofs: i64 = sqlx::query(
            "SELECT COALESCE(reltuples::bigint, 0) AS estimate FROM pg_class WHERE relname = 'used_tx_hashes'",
        )
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.get("estimate"))
        .unwrap_or(0);

        let requests_last_day: i64 = sqlx::query(
            "SELECT count(*) AS n FROM requests WHERE created_at > now() - interval '1 day'",
        )
        .fetch_one(&self.pool)
        .await?
        .get("n");

        let proofs_last_day: i64 = sqlx::query(
            "SELECT count(*) AS n FROM used_tx_hashes WHERE created_at > now() - interval '1 day'",
        )
        .fetch_one(&self.pool)
        .await?
        .get("n");

        Ok(LedgerStats {
            total_requests,
            total_used_proofs,
            requests_last_day,
            proofs_last_day,
        })
    }

    /// Deletes request-log rows older than the retention window.
    pub async fn cleanup_old_requests(&self, days: u32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM requests WHERE created_at < now() - make_interval(days => $1)",
        )
        .bind(days as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Spawns the daily retention job. Exits when the token is cancelled.
    pub fn spawn_cleanup_task(
        &self,
        retention_days: u32,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match ledger.cleanup_old_requests(retention_days).await {
                            Ok(deleted) if deleted > 0 => {
                                tracing::info!(deleted, retention_days, "pruned old request-log rows");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "request-log cleanup failed"),
                        }
                    }
                }
            }
        });
    }

    /// Closes the pool. Called after the log flusher has drained.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
