//! # OS termination signals.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`, plus `Ctrl-C`.
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].

use crate::error::RuntimeError;

/// Completes when the process receives a termination signal.
///
/// Each call installs independent listeners. Fails if they cannot be registered.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> Result<(), RuntimeError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).map_err(RuntimeError::ShutdownSignal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(RuntimeError::ShutdownSignal)?;
    let mut sigquit = signal(SignalKind::quit()).map_err(RuntimeError::ShutdownSignal)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> Result<(), RuntimeError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(RuntimeError::ShutdownSignal)
}
