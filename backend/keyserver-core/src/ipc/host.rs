//! Notifications from the key server to the application embedding it.

use crate::ipc::ServerStatus;
use crate::keys::{KeyId, KeyStatus};

use std::path::Path;

/// Receiver for key and server lifecycle events.
///
/// Callbacks are advisory: the server never waits on their outcome. They run
/// on the server task (or on the caller of a facade operation) and must not
/// block.
pub trait HostCallbacks: Send + Sync {
    /// A client asked for a key that is not loaded.
    ///
    /// `context_file` is the file that referenced the key, when the client
    /// supplied one. The host typically prompts the user for a passphrase and
    /// answers through [`KeyServerFacade::try_resolve_key`](crate::ipc::KeyServerFacade::try_resolve_key).
    fn on_key_load_request(&self, key_id: KeyId, status: KeyStatus, context_file: Option<&Path>);

    fn on_key_status_changed(&self, key_id: KeyId, status: KeyStatus);

    fn on_server_status_changed(&self, status: ServerStatus);
}

/// Callbacks that ignore every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHostCallbacks;

impl HostCallbacks for NoopHostCallbacks {
    fn on_key_load_request(&self, _key_id: KeyId, _status: KeyStatus, _context_file: Option<&Path>) {}

    fn on_key_status_changed(&self, _key_id: KeyId, _status: KeyStatus) {}

    fn on_server_status_changed(&self, _status: ServerStatus) {}
}
