use crate::error::transport::TransportError;
use crate::transport::StopToken;

use common::ErrorLocation;

use std::panic::Location;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// One connected end of a channel.
///
/// Every I/O call races the supplied [`StopToken`]; a stop surfaces as
/// [`TransportError::Cancelled`].
pub struct ChannelEndpoint {
    stream: UnixStream,
}

impl ChannelEndpoint {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Write all of `bytes` and flush.
    pub async fn send(&mut self, bytes: &[u8], stop: &StopToken) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            _ = stop.requested() => Err(TransportError::Cancelled {
                location: ErrorLocation::from(Location::caller()),
            }),
            written = async {
                self.stream.write_all(bytes).await?;
                self.stream.flush().await
            } => Ok(written?),
        }
    }

    /// Read whatever is available into `buf`. Returns `0` on end of stream.
    pub async fn receive(&mut self, buf: &mut [u8], stop: &StopToken) -> Result<usize, TransportError> {
        tokio::select! {
            biased;
            _ = stop.requested() => Err(TransportError::Cancelled {
                location: ErrorLocation::from(Location::caller()),
            }),
            read = self.stream.read(buf) => Ok(read?),
        }
    }

    /// Half-close the write side so the peer sees a clean end of stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(self.stream.shutdown().await?)
    }
}
