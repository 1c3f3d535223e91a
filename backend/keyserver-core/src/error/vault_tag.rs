use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum VaultTagError {
    #[error("Vault Tag Conflict Error: {dir} holds {} tags ({}) {location}", tags.len(), tags.join(", "))]
    Conflict {
        dir: PathBuf,
        tags: Vec<String>,
        location: ErrorLocation,
    },

    #[error("Vault Tag Mismatch Error: {dir} is tagged {existing}, expected {expected} {location}")]
    Mismatch {
        dir: PathBuf,
        existing: String,
        expected: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for VaultTagError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        VaultTagError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
