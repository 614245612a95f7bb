//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Init logging → Spawn dispatcher
//!
//! Shutdown:
//!     SIGTERM/SIGINT → Shutdown::trigger → dispatcher drains and exits
//! ```
//!
//! # Design Decisions
//! - One watch channel fans the shutdown signal out to however many tasks
//!   care; triggering twice is harmless
//! - The dispatcher kills every in-flight load on shutdown rather than
//!   waiting for bodies to finish

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger `shutdown` when the process receives SIGINT (or SIGTERM on unix).
pub async fn listen_for_signals(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::warn!(%error, "failed to register SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    shutdown.trigger();
}
