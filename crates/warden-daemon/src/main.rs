//! Warden Daemon - Main entry point
//!
//! Runs the security orchestrator on the bench device and serves the IPC
//! socket. A reboot request ends the process; the supervisor restarts it.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden_daemon::{sim, DaemonConfig, FileStorage, IpcServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Warden daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = std::env::var("WARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| DaemonConfig::default_path());

    let config = if config_path.exists() {
        DaemonConfig::load(&config_path)?
    } else {
        let config = DaemonConfig::default();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(&config_path)?;
        info!("Created default config at {:?}", config_path);
        config
    };

    config.ensure_directories()?;

    let storage = Arc::new(FileStorage::open(&config.store_path)?);
    let (mut orchestrator, bench) = sim::assemble(storage, &config);
    let bench = Arc::new(bench);

    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&bench));
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    info!("Daemon started successfully");

    tokio::select! {
        reason = orchestrator.run() => {
            info!("Device reboot requested: {:?}", reason);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = ipc_handle => {
            error!("IPC server exited unexpectedly");
        }
    }

    info!("Daemon shutting down");

    Ok(())
}
