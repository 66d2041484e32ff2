//! Graceful shutdown signal handling.
//!
//! A small local stand-in for the shutdown helpers the hosting binary would
//! otherwise reach for in a shared ops crate: a future that resolves on
//! SIGINT/SIGTERM, plus a task that cancels a [`CancellationToken`] when it
//! does and records whether the shutdown stayed within its deadline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio_util::sync::CancellationToken;

/// Resolves once the process receives Ctrl-C, or (on Unix) SIGTERM.
pub async fn default_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Spawns a task that cancels a fresh [`CancellationToken`] once `signal`
/// resolves. Returns that token, plus a flag the caller should clear if a
/// subsequent graceful-shutdown deadline was missed; the flag's final value
/// is meant to become the process exit code.
pub fn spawn_shutdown_task(
    signal: impl Future<Output = ()> + Send + 'static,
) -> (CancellationToken, Arc<AtomicBool>) {
    let token = CancellationToken::new();
    let is_graceful_shutdown = Arc::new(AtomicBool::new(true));
    tokio::spawn({
        let token = token.clone();
        async move {
            signal.await;
            tracing::info!("received shutdown signal");
            token.cancel();
        }
    });
    (token, is_graceful_shutdown)
}
