use std::sync::Arc;

use tokio::sync::watch;

/// Monotonic cancellation signal shared between a server loop and its callers.
///
/// Once [`request`](StopToken::request) has been called every clone observes
/// the stop, including futures already parked in [`requested`](StopToken::requested).
#[derive(Debug, Clone)]
pub struct StopToken {
    sender: Arc<watch::Sender<bool>>,
}

impl StopToken {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request a stop. Idempotent.
    pub fn request(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once a stop has been requested (immediately if it already was).
    pub async fn requested(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on a stop.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}
