//! x402 gateway HTTP entrypoint.
//!
//! Launches the monetizing reverse proxy: loads configuration, connects the
//! ledger, initializes the fast-rail receipt verifier and the external
//! facilitator client, and serves the request pipeline until SIGINT/SIGTERM.
//!
//! Startup order matters: required environment is validated before any
//! network connection is attempted, and a missing value exits non-zero.
//! Shutdown order matters too: the HTTP server drains first, then the
//! request-log flusher, then the database pool closes.

use dotenvy::dotenv;
use std::net::SocketAddr;
use std::time::Duration;

use x402_gateway::app;
use x402_gateway::config::{GatewayConfig, RequiredEnv};
use x402_gateway::sig_down::SigDown;
use x402_gateway::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = match GatewayConfig::from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded");
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load config file; using defaults");
            GatewayConfig::default()
        }
    };

    let env = match RequiredEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            tracing::error!(error = %e, "missing required configuration");
            std::process::exit(1);
        }
    };

    let state = match app::build_state(config, env).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize gateway state");
            std::process::exit(1);
        }
    };

    let sig_down = SigDown::try_new()?;
    let server_cancel = sig_down.cancellation_token();

    // The flusher gets its own token, cancelled only after the server has
    // drained, so late in-flight requests still reach the log.
    let flusher_cancel = tokio_util::sync::CancellationToken::new();
    let flusher = tokio::spawn(state.log_queue.clone().run_flusher(
        state.ledger.clone(),
        Duration::from_millis(state.config.ledger.flush_interval_ms),
        flusher_cancel.clone(),
    ));

    state
        .ledger
        .spawn_cleanup_task(state.config.ledger.retention_days, server_cancel.clone());

    // Periodic rate-limiter window cleanup.
    {
        let state = state.clone();
        let cancel = server_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => state.rate_limiter.cleanup(),
                }
            }
        });
    }

    let router = app::build_router(state.clone());

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8402);
    let addr = SocketAddr::new(host.parse()?, port);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("gateway listening at http://{addr}");

    let graceful = async move { server_cancel.cancelled().await };
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .await?;

    tracing::info!("server drained; flushing request log");
    flusher_cancel.cancel();
    if let Err(e) = flusher.await {
        tracing::warn!(error = %e, "flusher task did not exit cleanly");
    }
    state.ledger.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}
