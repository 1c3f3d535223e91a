pub mod client;
pub mod config;
pub mod framing;
pub mod server;
pub mod transport;
pub mod vault_tag;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    #[error(transparent)]
    Framing(#[from] framing::FramingError),

    #[error(transparent)]
    Server(#[from] server::KeyServerError),

    #[error(transparent)]
    Client(#[from] client::ClientError),

    #[error(transparent)]
    VaultTag(#[from] vault_tag::VaultTagError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
