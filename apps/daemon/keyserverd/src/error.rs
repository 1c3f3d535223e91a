use keyserver_core::error::CoreError;
use keyserver_core::error::config::ConfigError;
use keyserver_core::error::server::KeyServerError;

use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error;

/// Errors that end the daemon.
#[derive(Debug, Error)]
pub enum KeyServerDaemonError {
    /// Error from the daemon itself (environment, logging, lifecycle)
    #[error("Daemon Error: {message} {location}")]
    Daemon {
        message: String,
        location: ErrorLocation,
    },

    /// Error from keyserver-core (config, transport, server)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },
}

impl From<CoreError> for KeyServerDaemonError {
    #[track_caller]
    fn from(error: CoreError) -> Self {
        KeyServerDaemonError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ConfigError> for KeyServerDaemonError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        KeyServerDaemonError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<KeyServerError> for KeyServerDaemonError {
    #[track_caller]
    fn from(error: KeyServerError) -> Self {
        KeyServerDaemonError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
