use tokio_util::sync::CancellationToken;

/// Install a shutdown handler for SIGINT and, on unix, SIGTERM.
///
/// Returns a `CancellationToken` cancelled on the first signal. The scheduler
/// loop and any in-flight job bodies observe it and drain gracefully.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        };

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to install SIGTERM handler");
                        ctrl_c.await;
                        trigger.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await;
            tracing::info!("received ctrl-c, shutting down");
        }

        trigger.cancel();
    });

    token
}
