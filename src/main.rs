//! SQL Judge - Application Entry Point

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqljudge::{Config, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.rust_log.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SQL judge...");
    tracing::debug!(?config, "Configuration loaded");

    let mut server = Server::new(config)?;

    tracing::info!("Preparing trainer database...");
    if let Err(e) = server.prepare_trainer_database().await {
        tracing::error!("Failed to prepare trainer database: {}", e);
        server.shutdown().await;
        return Err(e.into());
    }

    let served = server.run(shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!("Server stopped: {}", e);
    }

    if server.shutdown().await {
        tracing::info!("SQL judge shutdown complete");
    } else {
        tracing::error!("SQL judge shutdown incomplete");
    }

    served?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
}
