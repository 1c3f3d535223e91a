use keyserver_core::ipc::{HostCallbacks, ServerStatus};
use keyserver_core::keys::{KeyId, KeyStatus};

use std::path::Path;

use log::{info, warn};

/// Host for headless operation: every event goes to the log.
///
/// Without a front end nobody can answer a load request, so those are
/// warnings; an operator tool has to resolve the key.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHostCallbacks;

impl HostCallbacks for LoggingHostCallbacks {
    fn on_key_load_request(&self, key_id: KeyId, status: KeyStatus, context_file: Option<&Path>) {
        match context_file {
            Some(file) => warn!(
                "Key {key_id} ({status}) requested for {} but not loaded",
                file.display()
            ),
            None => warn!("Key {key_id} ({status}) requested but not loaded"),
        }
    }

    fn on_key_status_changed(&self, key_id: KeyId, status: KeyStatus) {
        info!("Key {key_id} is now {status}");
    }

    fn on_server_status_changed(&self, status: ServerStatus) {
        info!("Key server is {status}");
    }
}
