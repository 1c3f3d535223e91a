mod dispatch;
mod handlers;

use crate::ipc::{HostCallbacks, ServerStatus};
use crate::keys::{KeyId, KeyStatus};

use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostEvent {
    LoadRequest(KeyId, KeyStatus, Option<PathBuf>),
    KeyStatus(KeyId, KeyStatus),
    ServerStatus(ServerStatus),
}

/// Host that records every callback.
#[derive(Default)]
pub(crate) struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    pub(crate) fn events(&self) -> Vec<HostEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl HostCallbacks for RecordingHost {
    fn on_key_load_request(&self, key_id: KeyId, status: KeyStatus, context_file: Option<&Path>) {
        self.events.lock().expect("events lock").push(HostEvent::LoadRequest(
            key_id,
            status,
            context_file.map(Path::to_path_buf),
        ));
    }

    fn on_key_status_changed(&self, key_id: KeyId, status: KeyStatus) {
        self.events
            .lock()
            .expect("events lock")
            .push(HostEvent::KeyStatus(key_id, status));
    }

    fn on_server_status_changed(&self, status: ServerStatus) {
        self.events
            .lock()
            .expect("events lock")
            .push(HostEvent::ServerStatus(status));
    }
}
