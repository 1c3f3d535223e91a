use crate::error::framing::FramingError;
use crate::error::transport::TransportError;

use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("Server Error: {kind}: {message} {location}")]
    Server {
        kind: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Unexpected Response Error: {message} {location}")]
    UnexpectedResponse {
        message: String,
        location: ErrorLocation,
    },
}
