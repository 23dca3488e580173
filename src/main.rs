use delivery_relay::config::Config;
use delivery_relay::lifecycle::{setup_tracing, RelaySystem};
use delivery_relay::relay::server::build_app;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = Config::from_env().map_err(|e| e.to_string())?;
    if config.store_endpoint.is_some() || config.store_credentials.is_some() {
        warn!("Remote store settings are present but this build only ships the in-process store");
    }

    let system = RelaySystem::in_memory(config);
    if let (Some(store), Some(path)) = (system.store(), system.config.store_seed_file.as_ref()) {
        store
            .seed_from_file(path)
            .await
            .map_err(|e| format!("Seeding from {} failed: {e}", path.display()))?;
    }

    let addr = system.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Cannot bind {addr}: {e}"))?;

    info!(%addr, "Tracking relay listening");
    axum::serve(listener, build_app(system.app_state()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| e.to_string())?;

    system.shutdown().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
