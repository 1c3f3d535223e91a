use crate::error::transport::TransportError;
use crate::transport::{ChannelEndpoint, ChannelListener, StopToken};

use common::ErrorLocation;

use std::fs::{create_dir_all, remove_file};
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::net::{UnixListener, UnixStream};

/// A channel named by a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelService {
    path: PathBuf,
}

impl ChannelService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Probe whether some process is accepting on this path.
    ///
    /// A stale socket file with nobody behind it reports `false`.
    pub fn is_listening(&self) -> bool {
        StdUnixStream::connect(&self.path).is_ok()
    }

    /// Bind a listener on the path.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AddressInUse`] if another listener answers on the path
    /// - [`TransportError::Permission`] if the path cannot be created
    /// - [`TransportError::Io`] for any other bind failure
    pub fn bind_and_listen(&self, backlog: u32) -> Result<ChannelListener, TransportError> {
        if self.is_listening() {
            return Err(TransportError::AddressInUse {
                path: self.path.clone(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }

        // Nobody answered, so whatever is at the path is stale.
        match remove_file(&self.path) {
            Ok(()) => debug!("Removed stale channel socket {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove stale channel socket {}: {}",
                self.path.display(),
                e
            ),
        }

        let listener = UnixListener::bind(&self.path).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => TransportError::AddressInUse {
                path: self.path.clone(),
                location: ErrorLocation::from(Location::caller()),
            },
            _ => TransportError::from(e),
        })?;

        info!(
            "Channel listening on {} (backlog {backlog})",
            self.path.display()
        );

        Ok(ChannelListener::new(self.path.clone(), listener, backlog))
    }

    /// Connect to the listener on the path.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotFound`] if no socket file exists
    /// - [`TransportError::ConnectionRefused`] if the file exists but nobody listens
    /// - [`TransportError::Cancelled`] if `stop` fires first
    pub async fn connect(&self, stop: &StopToken) -> Result<ChannelEndpoint, TransportError> {
        let connected = tokio::select! {
            biased;
            _ = stop.requested() => {
                return Err(TransportError::Cancelled {
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            connected = UnixStream::connect(&self.path) => connected,
        };

        match connected {
            Ok(stream) => Ok(ChannelEndpoint::new(stream)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransportError::NotFound {
                path: self.path.clone(),
                location: ErrorLocation::from(Location::caller()),
            }),
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                Err(TransportError::ConnectionRefused {
                    path: self.path.clone(),
                    location: ErrorLocation::from(Location::caller()),
                })
            }
            Err(e) => Err(TransportError::from(e)),
        }
    }
}
