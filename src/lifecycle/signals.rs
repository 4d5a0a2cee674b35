//! OS signal handling.
//!
//! # Responsibilities
//! - SIGINT (Ctrl+C) and SIGTERM trigger graceful shutdown
//! - SIGHUP forces an immediate config re-check instead of waiting for the
//!   next poll tick

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::{ConfigWatcher, PollOutcome};
use crate::lifecycle::Shutdown;

/// Trigger `shutdown` on the first SIGINT or SIGTERM.
pub fn spawn_shutdown_listener(shutdown: Arc<Shutdown>) {
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                on_interrupt.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.trigger();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });

    #[cfg(not(unix))]
    let _ = shutdown;
}

/// Re-check the config source on every SIGHUP until `stop` fires.
#[cfg(unix)]
pub fn spawn_reload_listener(watcher: Arc<ConfigWatcher>, mut stop: broadcast::Receiver<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGHUP");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    let outcome = watcher.poll_once();
                    tracing::info!(outcome = ?outcome, "Received SIGHUP, config re-checked");
                    if outcome == PollOutcome::Rejected {
                        tracing::warn!("Reload rejected; previous configuration still active");
                    }
                }
                _ = stop.recv() => break,
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_watcher: Arc<ConfigWatcher>, _stop: broadcast::Receiver<()>) {}
