//! Shutdown signal plumbing.
//!
//! Listens for SIGINT/SIGTERM and fans the event out through a
//! `CancellationToken` shared by the HTTP server, the request-log flusher,
//! and the periodic maintenance tasks.

use tokio_util::sync::CancellationToken;

pub struct SigDown {
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal listeners. Fails if the process cannot register
    /// signal handlers.
    pub fn try_new() -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let trigger = token.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                    _ = sigint.recv() => tracing::info!("SIGINT received"),
                }
                trigger.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("ctrl-c received");
                }
                trigger.cancel();
            });
        }

        Ok(Self { token })
    }

    /// A token cancelled when a termination signal arrives.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
