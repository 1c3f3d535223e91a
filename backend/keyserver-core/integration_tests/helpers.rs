//! Test helpers for key server integration tests.
//!
//! - Temporary socket paths
//! - A facade started against an in-memory key chain
//! - A host that records callbacks
//! - A passphrase seed

use keyserver_core::ipc::{
    DEFAULT_REQUEST_TIMEOUT, DispatchTable, HostCallbacks, KeyServerClient, KeyServerFacade,
    ServerStatus,
};
use keyserver_core::keys::{
    KeyChain, KeyId, KeySeed, KeyStateStore, KeyStatus, MemoryKeyChain, PassphraseRecovery,
};
use keyserver_core::transport::ChannelService;

use common::RedactedSecret;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use zeroize::Zeroizing;

pub const TEST_BACKLOG: u32 = 4;
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    LoadRequest(KeyId, KeyStatus, Option<PathBuf>),
    KeyStatus(KeyId, KeyStatus),
    ServerStatus(ServerStatus),
}

#[derive(Default)]
pub struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn server_events(&self) -> Vec<ServerStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HostEvent::ServerStatus(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: HostEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl HostCallbacks for RecordingHost {
    fn on_key_load_request(&self, key_id: KeyId, status: KeyStatus, context_file: Option<&Path>) {
        self.push(HostEvent::LoadRequest(
            key_id,
            status,
            context_file.map(Path::to_path_buf),
        ));
    }

    fn on_key_status_changed(&self, key_id: KeyId, status: KeyStatus) {
        self.push(HostEvent::KeyStatus(key_id, status));
    }

    fn on_server_status_changed(&self, status: ServerStatus) {
        self.push(HostEvent::ServerStatus(status));
    }
}

/// Seed that loads `key` when given `passphrase`.
pub struct PassphraseSeed {
    pub passphrase: &'static str,
    pub key: &'static [u8],
}

impl KeySeed for PassphraseSeed {
    fn passphrase_recovery(&self) -> Option<&dyn PassphraseRecovery> {
        Some(self)
    }
}

impl PassphraseRecovery for PassphraseSeed {
    fn try_resolve(&self, key_id: KeyId, secret: &RedactedSecret, key_chain: &dyn KeyChain) -> bool {
        if secret.expose() != self.passphrase.as_bytes() {
            return false;
        }
        key_chain.insert(key_id, Zeroizing::new(self.key.to_vec()));
        true
    }
}

/// Socket path inside `dir`, short enough for `sun_path`.
pub fn socket_path(dir: &TempDir) -> PathBuf {
    dir.path().join("ks.sock")
}

/// A facade on a private socket, not yet started.
pub struct TestServer {
    pub dir: TempDir,
    pub facade: KeyServerFacade,
    pub host: Arc<RecordingHost>,
    pub key_chain: Arc<MemoryKeyChain>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_dispatch_table(DispatchTable::with_defaults())
    }

    pub fn with_dispatch_table(dispatch: DispatchTable) -> Self {
        Self::with_parts(dispatch, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Default handlers, each connection limited to `limit`.
    pub fn with_request_timeout(limit: Duration) -> Self {
        Self::with_parts(DispatchTable::with_defaults(), limit)
    }

    fn with_parts(dispatch: DispatchTable, request_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let key_chain = Arc::new(MemoryKeyChain::new());
        let store = KeyStateStore::with_key_chain(Arc::clone(&key_chain) as Arc<dyn KeyChain>);
        let facade = KeyServerFacade::with_dispatch_table(
            ChannelService::new(socket_path(&dir)),
            TEST_BACKLOG,
            store,
            dispatch,
        )
        .with_request_timeout(request_timeout);

        Self {
            dir,
            facade,
            host: Arc::new(RecordingHost::default()),
            key_chain,
        }
    }

    /// Started server, ready to accept.
    pub async fn started() -> Self {
        let server = Self::new();
        server.start().await;
        server
    }

    pub async fn start(&self) {
        let status = self
            .facade
            .start_server(Arc::clone(&self.host) as Arc<dyn HostCallbacks>)
            .await
            .expect("Failed to start key server");
        assert_eq!(status, ServerStatus::Running);
    }

    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.dir)
    }

    pub fn client(&self) -> KeyServerClient {
        KeyServerClient::new(self.facade.service().clone())
    }

    pub async fn stop(&self) -> bool {
        self.facade.wait_for_server_stop(STOP_TIMEOUT).await
    }
}
