use tokio::signal;
use tokio::sync::watch;
use tracing::warn;

/// A `watch` channel that flips to `true` exactly once, the first time
/// SIGINT or SIGTERM arrives. Cloning the receiver is how every long-running
/// task (the sync loop, in this bridge) observes shutdown cooperatively.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Waits for SIGINT (Ctrl+C) or, on Unix, SIGTERM, then flips `tx` to
/// signal every subscriber to stop at its next opportunity.
pub async fn wait_for_shutdown_signal(tx: watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received ctrl-c, shutting down"),
        _ = terminate => warn!("received sigterm, shutting down"),
    }

    let _ = tx.send(true);
}
