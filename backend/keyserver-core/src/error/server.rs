use crate::error::framing::FramingError;
use crate::error::transport::TransportError;

use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum KeyServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("Invalid Request Error: {message} {location}")]
    InvalidRequest {
        message: String,
        location: ErrorLocation,
    },

    #[error("Handler Error: {message} {location}")]
    Handler {
        message: String,
        location: ErrorLocation,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },
}

impl KeyServerError {
    /// Stable name of the failure class, sent to clients in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyServerError::Transport(_) => "transport",
            KeyServerError::Framing(_) => "framing",
            KeyServerError::InvalidRequest { .. } => "invalid_request",
            KeyServerError::Handler { .. } => "handler",
            KeyServerError::Timeout { .. } => "timeout",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            KeyServerError::Transport(e) => e.is_cancelled(),
            KeyServerError::Framing(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
