use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Cancels `cancel` once `signal` resolves.
///
/// If the listener itself fails, the error is logged and the token is left
/// alone, so the agent keeps running instead of stopping right after start.
pub async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}
