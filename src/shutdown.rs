use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Token cancelled on the first SIGTERM or SIGINT.
///
/// Pass it as the parent of a [`CancellableRunner`](crate::CancellableRunner)
/// so queued jobs are abandoned and running ones stop retrying.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    // Detached: the listener lives until a signal arrives or the token is cancelled.
    drop(cancel_on_signal(token.clone()));
    token
}

/// Cancel `token` when the process receives SIGTERM or SIGINT.
///
/// The listener task exits early, leaving the token untouched, if the token
/// is cancelled some other way first. The returned handle completes when the
/// listener exits.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        let signal_name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = token.cancelled() => return,
        };

        tracing::info!(signal = signal_name, "Shutdown signal received, cancelling jobs");
        token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn listener_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let listener = cancel_on_signal(token.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!listener.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should exit once the token is cancelled")
            .expect("listener task panicked");
    }

    #[tokio::test]
    async fn installed_handler_starts_uncancelled() {
        let token = install_shutdown_handler();
        assert!(!token.is_cancelled());
    }
}
