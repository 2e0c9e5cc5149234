//! HTTP server startup logic.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{HttpServerConfig, SHUTDOWN_GRACE_SECS};
use crate::jobs::JobStore;

use super::shutdown::shutdown_signal;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid http.host or http.port: {0}")]
    Address(String),

    #[error("Failed to bind server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Bind the configured address and serve until SIGINT/SIGTERM.
pub async fn start_server(
    app: Router,
    config: &HttpServerConfig,
    jobs: JobStore,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| ServerError::Address(e.to_string()))?;

    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    tracing::info!(%addr, "Starting HTTP server");

    serve(listener, app, jobs, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// On shutdown running jobs are cancelled and open connections get
/// `SHUTDOWN_GRACE_SECS` to finish before the server stops waiting.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    jobs: JobStore,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let drain = CancellationToken::new();
    let drain_signal = drain.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain_signal.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.map_err(ServerError::Server),
        _ = shutdown => {}
    }

    let cancelled = jobs.shutdown();
    drain.cancel();
    tracing::info!(
        cancelled_jobs = cancelled,
        "Graceful shutdown initiated, waiting up to {} seconds for connections to close",
        SHUTDOWN_GRACE_SECS
    );

    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), server).await {
        Ok(result) => result.map_err(ServerError::Server),
        Err(_) => {
            tracing::warn!("Grace period elapsed with connections still open");
            Ok(())
        }
    }
}
