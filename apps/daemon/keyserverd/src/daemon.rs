use crate::error::KeyServerDaemonError;
use crate::host::LoggingHostCallbacks;

use keyserver_core::config::ServerConfig;
use keyserver_core::ipc::{HostCallbacks, KeyServerFacade, ServerStatus};
use keyserver_core::keys::{KeyChain, MemoryKeyChain, NoSeedLoader, SeedLoader};

use common::ErrorLocation;

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info};
use tokio::time::{MissedTickBehavior, interval};

/// Serve the key server described by `config` until `shutdown` resolves.
///
/// The stock daemon starts with an empty in-memory key chain, no seed loader
/// and a host that only logs. Nothing in it can resolve a key, so every key
/// reports `Unknown` and is never served. Applications that own the key
/// side start the daemon through [`run_with`] instead.
///
/// # Errors
///
/// See [`run_with`].
pub async fn run(
    config: ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), KeyServerDaemonError> {
    run_with(
        config,
        Arc::new(MemoryKeyChain::new()),
        Arc::new(NoSeedLoader),
        Arc::new(LoggingHostCallbacks),
        shutdown,
    )
    .await
}

/// Serve with the given key chain, seed loader and host until `shutdown`
/// resolves.
///
/// Applies the configured visibility policy every sweep interval, then stops
/// the server and waits up to the configured stop timeout.
///
/// # Errors
///
/// - [`KeyServerDaemonError::Core`] if the config is invalid or binding fails
/// - [`KeyServerDaemonError::Daemon`] if the channel is served by another
///   process or the server does not stop in time
pub async fn run_with(
    config: ServerConfig,
    key_chain: Arc<dyn KeyChain>,
    seed_loader: Arc<dyn SeedLoader>,
    host: Arc<dyn HostCallbacks>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), KeyServerDaemonError> {
    config.validate()?;
    let policy = config.visibility_policy()?;

    let facade = KeyServerFacade::from_config(&config, key_chain, seed_loader);

    let status = facade.start_server(host).await?;
    if status != ServerStatus::Running {
        return Err(KeyServerDaemonError::Daemon {
            message: format!(
                "Cannot serve {}: channel is {status}",
                facade.service().path().display()
            ),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    info!("Key server daemon serving {}", facade.service().path().display());

    let mut sweep = interval(config.policy_sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sweep.tick() => {
                let hidden = facade.apply_visibility_policy(policy.as_ref(), SystemTime::now());
                if hidden > 0 {
                    info!("Visibility sweep hid {hidden} keys");
                } else {
                    debug!("Visibility sweep hid nothing");
                }
            }
        }
    }

    info!("Shutting down key server daemon");
    facade.stop_server();

    if !facade.wait_for_server_stop(config.stop_timeout()).await {
        return Err(KeyServerDaemonError::Daemon {
            message: format!(
                "Key server did not stop within {}",
                humantime::format_duration(config.stop_timeout())
            ),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    Ok(())
}
