use common::ErrorLocation;

use std::io::{Error as IoError, ErrorKind};
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Address In Use Error: {path} {location}")]
    AddressInUse {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Permission Error: {message} {location}")]
    Permission {
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Found Error: {path} {location}")]
    NotFound {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("Connection Refused Error: {path} {location}")]
    ConnectionRefused {
        path: PathBuf,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },

    #[error("Cancelled {location}")]
    Cancelled { location: ErrorLocation },
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled { .. })
    }
}

impl From<IoError> for TransportError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        match error.kind() {
            ErrorKind::PermissionDenied => TransportError::Permission {
                message: error.to_string(),
                location: ErrorLocation::from(Location::caller()),
            },
            _ => TransportError::Io {
                message: error.to_string(),
                location: ErrorLocation::from(Location::caller()),
            },
        }
    }
}
