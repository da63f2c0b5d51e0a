use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fitsync_backend::{build_app, logging, rate_limit, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv();

    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }
    tracing::info!("Starting FitSync backend ({})", config.environment);

    let state = Arc::new(AppState::new(config.clone())?);
    tracing::info!("Writing request logs to {}", state.log_sink.dir().display());

    // Background maintenance
    let sweeper = rate_limit::spawn_sweeper(
        state.rate_limits.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs),
    );
    let rotation = logging::spawn_rotation(
        state.log_sink.clone(),
        Duration::from_secs(config.logging.rotation_interval_secs),
    );

    let app = build_app(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("FitSync backend listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
    .await?;

    sweeper.abort();
    rotation.abort();
    tracing::info!("Server closed");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Connections still open after `timeout`
/// are abandoned and the process exits.
async fn shutdown_signal(timeout: Duration) {
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received, shutting down gracefully"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down gracefully"),
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::error!("Could not close connections in time, forcefully shutting down");
        std::process::exit(1);
    });
}
