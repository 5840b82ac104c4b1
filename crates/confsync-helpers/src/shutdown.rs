use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Waits for SIGINT or SIGTERM and cancels `token`.
///
/// On non-unix targets only ctrl-c is wired up. If a unix signal stream
/// cannot be installed the listener degrades to ctrl-c rather than
/// leaving the process without any shutdown path.
pub async fn listen(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let streams = signal(SignalKind::terminate())
            .and_then(|term| Ok((term, signal(SignalKind::interrupt())?)));

        match streams {
            Ok((mut sigterm, mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => warn!("shutdown signal received: SIGTERM"),
                    _ = sigint.recv() => warn!("shutdown signal received: SIGINT"),
                }
                token.cancel();
            }
            Err(err) => {
                warn!("failed to install signal handlers: error={err}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("shutdown signal received: SIGINT");
                    token.cancel();
                }
            }
        }
        return;
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("shutdown signal received: SIGINT");
        token.cancel();
    }
}
