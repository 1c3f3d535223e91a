use keyserverd::daemon::run;
use keyserverd::env::try_load_dotenv;
use keyserverd::error::KeyServerDaemonError;
use keyserverd::logger::{default_log_dir, initialize as LoggerInitialize};

use keyserver_core::config::{ServerConfig, default_config_dir};

use common::ErrorLocation;

use std::fs::create_dir_all;
use std::panic::Location;

use log::{error, info, warn};
use tokio::signal::ctrl_c;
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main]
async fn main() -> Result<(), KeyServerDaemonError> {
    let env = try_load_dotenv();

    let log_dir = default_log_dir();
    create_dir_all(&log_dir).map_err(|e| KeyServerDaemonError::Daemon {
        message: format!("Failed to create log directory: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    // Initialize logger FIRST
    LoggerInitialize(&log_dir)?;

    info!("Key server daemon starting");
    info!("Log directory: {}", log_dir.display());
    match (env.path, env.error) {
        (Some(path), _) => info!("Loaded .env from: {}", path.display()),
        (None, Some(e)) => warn!("{e}"),
        (None, None) => {}
    }

    let config_dir = default_config_dir();
    let config = ServerConfig::load(&config_dir)?;
    info!("Config directory: {}", config_dir.display());

    let result = run(config, shutdown_signal()).await;
    match &result {
        Ok(()) => info!("Key server daemon stopped"),
        Err(e) => error!("Key server daemon failed: {e}"),
    }
    result
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => Some(terminate),
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            None
        }
    };

    tokio::select! {
        result = ctrl_c() => {
            if let Err(e) = result {
                warn!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C");
        }
        _ = async {
            match terminate.as_mut() {
                Some(terminate) => {
                    terminate.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        } => info!("Received SIGTERM"),
    }
}
