use std::error::Error;
use std::net::SocketAddr;

use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uplink_core::BackendBuilder;
use uplink_core::config::Settings;

mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::load()?;
    info!(?settings, "Starting uplink");
    info!(
        instance_id = %settings.instance_id,
        backend = %settings.backend,
        "Using backend"
    );

    let backend = BackendBuilder::new(settings.sink_type())
        .entries_per_file(settings.entries_per_file)
        .sweep_interval(settings.sweep_interval())
        .build()
        .await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let server = tokio::spawn(uplink_serving::start_server(
        addr,
        backend.handle(),
        shutdown.clone(),
    ));

    // The worker stops once the server has released its handle, or on its own when a write
    // fails, in which case the server is stopped too.
    let worker_shutdown = shutdown.clone();
    let worker = async move {
        let result = backend.join().await;
        if result.is_err() {
            worker_shutdown.cancel();
        }
        result
    };

    let (worker_result, server_result) = tokio::join!(worker, server);
    shutdown.cancel();

    worker_result?;
    server_result??;
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    info!("Received shutdown signal, stopping");
    shutdown.cancel();
}
