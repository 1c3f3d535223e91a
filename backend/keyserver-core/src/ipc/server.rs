//! The key server control loop.
//!
//! One [`KeyServer`] owns one bound listener and serves it from a single
//! background task. Every accepted connection carries exactly one request
//! frame and receives exactly one response frame; requests are handled
//! sequentially.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted --start()--> Running --request_stop()--> StopRequested --> Stopped
//!      \_____________________request_stop()________________________________/
//! ```
//!
//! `Stopped` is terminal. Whichever way the loop task ends (stop request,
//! listener failure or panic) a drop guard disposes the listener and
//! publishes stop completion exactly once.

use crate::error::server::KeyServerError;
use crate::framing::MessageFrame;
use crate::framing::message_code::name;
use crate::ipc::{DispatchTable, HandlerContext, HostCallbacks};
use crate::keys::KeyStateStore;
use crate::transport::{ChannelEndpoint, ChannelListener, StopToken};

use common::ErrorLocation;

use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, timeout};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Time a connection gets to deliver its request, and again to take the response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::NotStarted => "not started",
            LoopPhase::Running => "running",
            LoopPhase::StopRequested => "stop requested",
            LoopPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct LoopShared {
    phase: Mutex<LoopPhase>,
    stop: StopToken,
    stopped: watch::Sender<bool>,
}

impl LoopShared {
    fn phase(&self) -> MutexGuard<'_, LoopPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A control loop serving one listener.
pub struct KeyServer {
    listener: Arc<ChannelListener>,
    store: KeyStateStore,
    dispatch: Arc<DispatchTable>,
    host: Arc<dyn HostCallbacks>,
    request_timeout: Duration,
    shared: Arc<LoopShared>,
}

impl KeyServer {
    pub fn new(
        listener: Arc<ChannelListener>,
        store: KeyStateStore,
        dispatch: Arc<DispatchTable>,
        host: Arc<dyn HostCallbacks>,
    ) -> Self {
        let (stopped, _receiver) = watch::channel(false);
        Self {
            listener,
            store,
            dispatch,
            host,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shared: Arc::new(LoopShared {
                phase: Mutex::new(LoopPhase::NotStarted),
                stop: StopToken::new(),
                stopped,
            }),
        }
    }

    /// Replace the per-connection time limit. Applies from the next `start`.
    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = limit;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn phase(&self) -> LoopPhase {
        *self.shared.phase()
    }

    pub fn listener(&self) -> &Arc<ChannelListener> {
        &self.listener
    }

    /// The token every suspending call of this loop observes.
    pub fn stop_token(&self) -> &StopToken {
        &self.shared.stop
    }

    /// Launch the loop and wait until it is accepting.
    ///
    /// Only the first call launches anything. Every call returns the phase
    /// observed once the start (if any) has completed.
    pub async fn start(&self) -> LoopPhase {
        {
            let mut phase = self.shared.phase();
            if *phase != LoopPhase::NotStarted {
                debug!("Key server already {}", *phase);
                return *phase;
            }
            *phase = LoopPhase::Running;
        }

        let (started_tx, started_rx) = oneshot::channel();
        let worker = LoopWorker {
            listener: Arc::clone(&self.listener),
            store: self.store.clone(),
            dispatch: Arc::clone(&self.dispatch),
            host: Arc::clone(&self.host),
            request_timeout: self.request_timeout,
            shared: Arc::clone(&self.shared),
        };

        tokio::spawn(worker.run(started_tx));

        if started_rx.await.is_err() {
            warn!("Key server loop exited before signalling start");
        }

        self.phase()
    }

    /// Ask the loop to stop. Idempotent; never waits.
    ///
    /// A loop that was never started goes straight to `Stopped` and releases
    /// its listener.
    pub fn request_stop(&self) {
        let mut phase = self.shared.phase();
        match *phase {
            LoopPhase::NotStarted => {
                *phase = LoopPhase::Stopped;
                drop(phase);

                debug!("Key server stopped before it was started");
                self.shared.stop.request();
                self.listener.dispose();
                self.shared.stopped.send_replace(true);
            }
            LoopPhase::Running => {
                *phase = LoopPhase::StopRequested;
                drop(phase);

                info!("Stop requested for key server on {}", self.listener.path().display());
                self.listener.request_stop();
                self.shared.stop.request();
            }
            LoopPhase::StopRequested | LoopPhase::Stopped => {}
        }
    }

    /// Request a stop and wait up to `limit` for the loop to finish.
    ///
    /// Returns whether the loop finished in time. Timing out cancels nothing
    /// beyond the stop request itself.
    pub async fn wait_for_stop(&self, limit: Duration) -> bool {
        self.request_stop();

        let mut stopped = self.shared.stopped.subscribe();
        let finished = timeout(limit, async move {
            stopped.wait_for(|stopped| *stopped).await.is_ok()
        })
        .await;

        match finished {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    "Key server on {} did not stop within {limit:?}",
                    self.listener.path().display()
                );
                false
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.borrow()
    }
}

impl Drop for KeyServer {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Publishes stop completion when the loop task ends, however it ends.
struct StopGuard {
    listener: Arc<ChannelListener>,
    shared: Arc<LoopShared>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        *self.shared.phase() = LoopPhase::Stopped;
        self.shared.stop.request();
        self.listener.dispose();
        self.shared.stopped.send_replace(true);
        info!("Key server on {} stopped", self.listener.path().display());
    }
}

/// State moved into the loop task.
struct LoopWorker {
    listener: Arc<ChannelListener>,
    store: KeyStateStore,
    dispatch: Arc<DispatchTable>,
    host: Arc<dyn HostCallbacks>,
    request_timeout: Duration,
    shared: Arc<LoopShared>,
}

impl LoopWorker {
    async fn run(self, started: oneshot::Sender<()>) {
        let _guard = StopGuard {
            listener: Arc::clone(&self.listener),
            shared: Arc::clone(&self.shared),
        };

        info!("Key server accepting on {}", self.listener.path().display());
        let _ = started.send(());

        let stop = &self.shared.stop;
        let mut request = MessageFrame::inbound();
        let mut response = MessageFrame::outbound();

        loop {
            if stop.is_requested() {
                break;
            }

            let endpoint = match self.listener.accept(stop).await {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => break,
                Err(e) => {
                    error!("Accept failed on {}: {e}", self.listener.path().display());
                    tokio::select! {
                        _ = stop.requested() => break,
                        _ = sleep(ACCEPT_RETRY_DELAY) => continue,
                    }
                }
            };

            match self
                .serve_connection(endpoint, &mut request, &mut response)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    if self.is_stopping() {
                        debug!("Connection cancelled by stop request");
                    } else {
                        warn!("Connection cancelled without a stop request: {e}");
                    }
                }
                Err(e) => warn!("Dropped connection: {e}"),
            }

            request.clear();
            response.clear();
        }
    }

    /// Read one request, dispatch it and send the response.
    ///
    /// Reading and writing are each bounded by the request timeout, so a
    /// client that stalls only loses its own connection.
    async fn serve_connection(
        &self,
        mut endpoint: ChannelEndpoint,
        request: &mut MessageFrame,
        response: &mut MessageFrame,
    ) -> Result<(), KeyServerError> {
        let stop = &self.shared.stop;
        let limit = self.request_timeout;

        let filled = timeout(limit, request.try_fill(&mut endpoint, stop))
            .await
            .map_err(|_| timed_out("receiving the request", limit))??;
        if !filled {
            trace!("Client disconnected without sending a request");
            return Ok(());
        }

        trace!(
            "Request {} ({}) with {} payload bytes",
            name(request.code()),
            request.code(),
            request.payload().len()
        );

        let context = HandlerContext {
            store: &self.store,
            host: self.host.as_ref(),
        };
        self.dispatch.dispatch(&context, request, response);

        timeout(limit, response.emit(&mut endpoint, stop))
            .await
            .map_err(|_| timed_out("sending the response", limit))??;

        if let Err(e) = endpoint.shutdown().await {
            trace!("Shutdown after response failed: {e}");
        }
        Ok(())
    }

    fn is_stopping(&self) -> bool {
        matches!(
            *self.shared.phase(),
            LoopPhase::StopRequested | LoopPhase::Stopped
        )
    }
}

#[track_caller]
fn timed_out(stage: &str, limit: Duration) -> KeyServerError {
    KeyServerError::Timeout {
        message: format!("Client took longer than {limit:?} {stage}"),
        location: ErrorLocation::from(Location::caller()),
    }
}
