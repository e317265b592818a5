mod config;
mod coordinator;
mod demo;
mod supervisor;

use std::path::PathBuf;
use std::str::FromStr;

use log::{error, info};
use tokio::sync::watch;

use config::Config;
use coordinator::RootCoordinator;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./mpsdlink.toml"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {}", e);
            std::process::exit(1);
        }
    };

    let level = log::LevelFilter::from_str(&config.logging.level).unwrap_or(log::LevelFilter::Info);
    if let Err(e) = mpsdlink_log::init(level, config.logging.file.as_deref()) {
        eprintln!("fatal: failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("mpsdlink starting, config loaded from {}", config_path.display());

    let coordinator = match RootCoordinator::bootstrap(config).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("fatal: failed to bootstrap coordinator: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let code = coordinator.run(shutdown_rx).await;
    info!("mpsdlink exiting with code {}", code);
    std::process::exit(code);
}

/// Waits for either Ctrl+C or, on Unix, SIGTERM, then signals the
/// coordinator to begin a graceful shutdown.
async fn wait_for_shutdown_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                let _ = tx.send(true);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }

    let _ = tx.send(true);
}
