use harbor_backend::{start_backend, BackendConfig};
use tokio::net::TcpListener;

use crate::{router, AppState, ProxyConfig, ProxyError};

/// Start the inference server, then serve the public router until a
/// shutdown signal arrives. The inference server is stopped on the way out.
pub async fn serve(proxy: ProxyConfig, backend: BackendConfig) -> Result<(), ProxyError> {
    let state = AppState::new(&proxy, &backend)?;

    let process = start_backend(&backend).await?;

    let addr = proxy.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(source) => {
            process.shutdown().await;
            return Err(ProxyError::Bind { addr, source });
        }
    };

    tracing::info!("Server listening on http://{}", addr);

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ProxyError::Serve);

    tracing::info!("Stopping inference server...");
    process.shutdown().await;

    result
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
