use std::path::Path;

use tokio::net::TcpListener;
use tokio::signal;

use crate::config::{AppMode, ConfigError, ServerConfig};
use crate::{db, handlers, logging, schema};

/// Loads `config_path`, prepares the database and serves until ctrl-c or SIGTERM.
pub async fn run(config_path: &Path) -> Result<(), ConfigError> {
    let config = ServerConfig::load(config_path).await?;
    logging::init_tracing(&config)?;
    tracing::info!(
        mode = ?config.app.mode,
        timezone = config.app.timezone.as_deref().unwrap_or("UTC"),
        "friendfinder server starting"
    );

    let state = db::connect_db(&config, config_path).await?;
    schema::apply_server_schema(&config, &state, config_path).await?;

    if config.app.mode == AppMode::Dev && config.dev.reset_on_start {
        db::reset_server_data(&config, &state).await?;
    }
    if let Some(seed) = &config.seed {
        db::ensure_default_user(&state, seed).await?;
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "friendfinder server listening");

    axum::serve(listener, handlers::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ConfigError::Invalid(format!("http server error: {e}")))?;

    tracing::info!("friendfinder server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
        tracing::info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!(error = %e, "terminate handler unavailable");
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
