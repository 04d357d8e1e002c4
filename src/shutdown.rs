use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` cancelled on the first signal. The node
/// withdraws its registrations and drains running jobs when it fires.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining node");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, draining node");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
