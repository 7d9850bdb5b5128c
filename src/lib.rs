//! drama-ocr: chat screenshot → speaker-attributed transcript.
//! Library root: module tree and the server bootstrap used by the binary.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;
pub mod scheduler;
pub mod server;
pub mod state_machine;
pub mod transcript;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StartupError;
use crate::server::AppState;

/// Bind, serve, and shut down gracefully on Ctrl-C / SIGTERM.
/// Shutdown cancels every in-flight request before draining connections.
pub async fn run(config: Config) -> Result<(), StartupError> {
    info!(
        bind = %config.bind_address,
        port = config.port,
        max_concurrency = config.max_concurrency,
        "drama-ocr starting"
    );

    let root = CancellationToken::new();
    let state = AppState::from_config(&config, root.clone())?;

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(
            inflight = signal_state.registry.len(),
            "shutdown signal received, cancelling in-flight requests"
        );
        signal_state.registry.cancel_all();
    });

    server::serve(listener, state, root).await?;
    info!("drama-ocr stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
