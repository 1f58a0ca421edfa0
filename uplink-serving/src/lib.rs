//! HTTP front of uplink. `POST /v0/log` decodes and validates a payload and hands it to the
//! backend; health and metrics endpoints sit next to it.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uplink_core::BackendHandle;

pub use self::error::{Error, Result};

mod app;
use app::router;

mod error;
mod metrics;

/// Outstanding requests get this long to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Health, liveness and metrics requests are answered within this.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) backend: BackendHandle,
}

/// Binds `addr` and serves until `shutdown` is cancelled.
pub async fn start_server(
    addr: SocketAddr,
    backend: BackendHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::InitError(format!("binding to {addr}: {e}")))?;
    serve(listener, backend, shutdown).await
}

/// Serves on an already bound listener until `shutdown` is cancelled, then waits up to
/// `DRAIN_TIMEOUT` for in flight requests.
pub async fn serve(
    listener: TcpListener,
    backend: BackendHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    serve_with_drain(listener, backend, shutdown, DRAIN_TIMEOUT).await
}

async fn serve_with_drain(
    listener: TcpListener,
    backend: BackendHandle,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| Error::InitError(format!("reading the local address: {e}")))?;
    info!(?addr, "Starting application server");

    let router = router(AppState { backend }, PROBE_TIMEOUT);
    let graceful = shutdown.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .into_future();

    // Requests still running when the drain deadline passes are dropped with the server.
    let drain_deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| Error::Server(format!("serving requests: {e}")))?;
        }
        _ = drain_deadline => {
            warn!(?drain_timeout, "Requests did not finish in time, stopping anyway");
        }
    }

    info!("Application server stopped");
    Ok(())
}
