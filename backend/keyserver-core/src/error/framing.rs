use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum FramingError {
    #[error("Truncated Frame Error: {message} {location}")]
    Truncated {
        message: String,
        location: ErrorLocation,
    },

    #[error("Payload Too Large Error: {length} bytes exceeds {limit} {location}")]
    PayloadTooLarge {
        length: usize,
        limit: usize,
        location: ErrorLocation,
    },

    #[error("Payload Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Payload Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FramingError {
    /// True when the underlying transport observed a stop request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FramingError::Transport(e) if e.is_cancelled())
    }
}

impl From<prost::DecodeError> for FramingError {
    #[track_caller]
    fn from(error: prost::DecodeError) -> Self {
        FramingError::Decode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<prost::EncodeError> for FramingError {
    #[track_caller]
    fn from(error: prost::EncodeError) -> Self {
        FramingError::Encode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
