use crate::error::transport::TransportError;
use crate::transport::{ChannelEndpoint, StopToken};

use std::fs::remove_file;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};
use tokio::net::UnixListener;

/// A bound, listening channel.
///
/// Shared between the control loop (which accepts) and the facade (which may
/// request a stop), so every operation takes `&self`.
pub struct ChannelListener {
    path: PathBuf,
    listener: UnixListener,
    backlog: u32,
    stop_requested: StopToken,
    disposed: AtomicBool,
}

impl ChannelListener {
    pub(crate) fn new(path: PathBuf, listener: UnixListener, backlog: u32) -> Self {
        Self {
            path,
            listener,
            backlog,
            stop_requested: StopToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    /// Wait for the next client.
    ///
    /// Returns `Ok(None)` when `stop` fires or [`request_stop`](Self::request_stop)
    /// was called, including while the accept is in progress.
    pub async fn accept(&self, stop: &StopToken) -> Result<Option<ChannelEndpoint>, TransportError> {
        if self.is_stop_requested() || stop.is_requested() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = stop.requested() => Ok(None),
            _ = self.stop_requested.requested() => Ok(None),
            accepted = self.listener.accept() => {
                let (stream, _addr) = accepted?;
                trace!("Accepted connection on {}", self.path.display());
                Ok(Some(ChannelEndpoint::new(stream)))
            }
        }
    }

    /// Interrupt in-flight and future accepts. Idempotent.
    pub fn request_stop(&self) {
        self.stop_requested.request();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.is_requested()
    }

    /// Stop accepting and delete the socket file.
    ///
    /// Runs at most once; later calls (and the drop that follows) are no-ops.
    /// The descriptor itself is released when the last reference is dropped.
    pub fn dispose(&self) {
        self.request_stop();

        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        match remove_file(&self.path) {
            Ok(()) => debug!("Removed channel socket {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Channel socket {} already gone", self.path.display())
            }
            Err(e) => warn!(
                "Failed to remove channel socket {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        self.dispose();
    }
}
