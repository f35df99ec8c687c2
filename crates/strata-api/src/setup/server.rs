//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use strata_core::Config;

/// Start the server with graceful shutdown
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port);
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let roots: Vec<String> = config
        .storage
        .local_roots
        .iter()
        .map(|root| root.display().to_string())
        .collect();
    tracing::info!(
        environment = %config.environment,
        local_roots = %roots.join(","),
        max_file_size_mb = config.storage.max_file_size_bytes / 1024 / 1024,
        max_concurrent_transfers = config.max_concurrent_transfers,
        transfer_fail_fast = config.transfer_fail_fast,
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolve on Ctrl+C (SIGINT) or SIGTERM. If a handler cannot be installed
/// that signal is ignored rather than shutting down immediately.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");

    strata_infra::shutdown_telemetry().await;
}
