use crate::config::ServerConfig;
use crate::error::server::KeyServerError;
use crate::ipc::{
    DEFAULT_REQUEST_TIMEOUT, DispatchTable, HostCallbacks, KeyServer, LoopPhase, NoopHostCallbacks,
};
use crate::keys::{
    KeyChain, KeyId, KeySeed, KeyStateInfo, KeyStateStore, KeyStatus, SeedLoader, VisibilityPolicy,
};
use crate::transport::{ChannelListener, ChannelService};

use common::RedactedSecret;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use log::{debug, info};

/// Externally observable state of the channel a facade manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Nobody serves the channel; `start_server` will bind it.
    CanStart,
    Running,
    /// A stop was requested and has not been waited for yet.
    Stopping,
    /// Another process is serving the channel path.
    Blocked,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::CanStart => "can start",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

struct FacadeInner {
    server: Option<Arc<KeyServer>>,
    listener: Option<Arc<ChannelListener>>,
    host: Arc<dyn HostCallbacks>,
}

/// Owns at most one running [`KeyServer`] for one channel path.
///
/// Lifecycle calls never fail for "already in that state" conditions; they
/// report the current [`ServerStatus`] instead. The facade lock is never held
/// across an await, so status queries do not wait on a starting or stopping
/// loop.
pub struct KeyServerFacade {
    service: ChannelService,
    backlog: u32,
    request_timeout: Duration,
    store: KeyStateStore,
    dispatch: Arc<DispatchTable>,
    inner: Mutex<FacadeInner>,
}

impl KeyServerFacade {
    pub fn new(service: ChannelService, backlog: u32, store: KeyStateStore) -> Self {
        Self::with_dispatch_table(service, backlog, store, DispatchTable::with_defaults())
    }

    /// Facade whose servers answer with `dispatch` instead of the built-in table.
    pub fn with_dispatch_table(
        service: ChannelService,
        backlog: u32,
        store: KeyStateStore,
        dispatch: DispatchTable,
    ) -> Self {
        Self {
            service,
            backlog,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            store,
            dispatch: Arc::new(dispatch),
            inner: Mutex::new(FacadeInner {
                server: None,
                listener: None,
                host: Arc::new(NoopHostCallbacks),
            }),
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        key_chain: Arc<dyn KeyChain>,
        seed_loader: Arc<dyn SeedLoader>,
    ) -> Self {
        Self::new(
            ChannelService::new(config.socket_path()),
            config.listen_backlog,
            KeyStateStore::new(key_chain, seed_loader),
        )
        .with_request_timeout(config.request_timeout())
    }

    /// Time each connection of the servers started from now on gets to send
    /// its request and to take the response.
    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = limit;
        self
    }

    pub fn service(&self) -> &ChannelService {
        &self.service
    }

    pub fn store(&self) -> &KeyStateStore {
        &self.store
    }

    pub fn server_state(&self) -> ServerStatus {
        let inner = self.lock();
        self.state_locked(&inner)
    }

    /// Bind the channel and start serving it.
    ///
    /// Returns the current status without side effects unless the channel is
    /// [`ServerStatus::CanStart`]. `host` replaces the callbacks of any
    /// previous run.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServerError::Transport`] if binding fails, including when
    /// another process takes the path between the probe and the bind.
    pub async fn start_server(
        &self,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<ServerStatus, KeyServerError> {
        let server = {
            let mut inner = self.lock();
            let status = self.state_locked(&inner);
            if status != ServerStatus::CanStart {
                debug!("Not starting key server: {status}");
                return Ok(status);
            }

            let listener = Arc::new(self.service.bind_and_listen(self.backlog)?);
            let server = Arc::new(
                KeyServer::new(
                    Arc::clone(&listener),
                    self.store.clone(),
                    Arc::clone(&self.dispatch),
                    Arc::clone(&host),
                )
                .with_request_timeout(self.request_timeout),
            );

            inner.listener = Some(listener);
            inner.server = Some(Arc::clone(&server));
            inner.host = Arc::clone(&host);
            server
        };

        let phase = server.start().await;
        if phase == LoopPhase::Running {
            info!("Key server started on {}", self.service.path().display());
            host.on_server_status_changed(ServerStatus::Running);
        }

        Ok(self.server_state())
    }

    /// Ask the running server (or a bare bound listener) to stop. Never waits.
    ///
    /// The host hears about the new status only when the call changed it.
    pub fn stop_server(&self) -> ServerStatus {
        let (before, status, host) = {
            let inner = self.lock();
            let before = self.state_locked(&inner);
            if let Some(server) = &inner.server {
                server.request_stop();
            } else if let Some(listener) = &inner.listener {
                listener.request_stop();
            } else {
                return before;
            }
            (before, self.state_locked(&inner), Arc::clone(&inner.host))
        };

        if status != before {
            host.on_server_status_changed(status);
        }
        status
    }

    /// Stop the server and wait up to `limit` for it to finish.
    ///
    /// On success the server and listener are released, so a later
    /// [`start_server`](Self::start_server) can bind the path again.
    pub async fn wait_for_server_stop(&self, limit: Duration) -> bool {
        let (server, host) = {
            let mut inner = self.lock();
            match inner.server.clone() {
                Some(server) => (server, Arc::clone(&inner.host)),
                None => {
                    if let Some(listener) = inner.listener.take() {
                        listener.dispose();
                    }
                    return true;
                }
            }
        };

        if !server.wait_for_stop(limit).await {
            return false;
        }

        {
            let mut inner = self.lock();
            if inner
                .server
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &server))
            {
                inner.server = None;
                inner.listener = None;
            }
        }
        drop(server);

        let status = self.server_state();
        host.on_server_status_changed(status);
        true
    }

    /// Metadata of every registered key, sorted by id.
    pub fn key_infos(&self) -> Vec<KeyStateInfo> {
        self.store.infos()
    }

    /// Try to load a registered key by recovering it from its seed.
    ///
    /// Returns `false` for keys that were never registered.
    pub fn try_resolve_key(&self, key_id: KeyId, secret: &RedactedSecret) -> bool {
        let Some(state) = self.store.find(&key_id) else {
            debug!("Cannot resolve unregistered key {key_id}");
            return false;
        };

        let before = state.status();
        let resolved = state.try_resolve(secret);
        self.notify_if_changed(key_id, before, state.status());
        resolved
    }

    /// Hide or publish a registered key. `None` if the key is not registered.
    pub fn set_key_hidden(&self, key_id: KeyId, hidden: bool) -> Option<KeyStatus> {
        let state = self.store.find(&key_id)?;
        let before = state.status();
        let after = state.set_hidden(hidden);
        self.notify_if_changed(key_id, before, after);
        Some(after)
    }

    /// Attach (or with `None`, detach) a seed, registering the key if needed.
    pub fn attach_seed(&self, key_id: KeyId, seed: Option<Arc<dyn KeySeed>>) -> KeyStatus {
        let existed = self.store.has(&key_id);
        let state = self.store.get_or_create(key_id);
        let before = if existed {
            state.status()
        } else {
            KeyStatus::Unknown
        };
        let after = state.attach_seed(seed);
        self.notify_if_changed(key_id, before, after);
        after
    }

    /// Forget a key: drop its state and wipe its bytes from the key chain.
    pub fn remove_key(&self, key_id: KeyId) -> bool {
        let Some(state) = self.store.remove(&key_id) else {
            return false;
        };

        let before = state.status();
        self.store.key_chain().remove(&key_id);
        info!("Removed key {key_id}");
        self.notify_if_changed(key_id, before, KeyStatus::Unknown);
        true
    }

    /// Hide every key `policy` selects at `now`. Returns how many were hidden.
    pub fn apply_visibility_policy(&self, policy: &dyn VisibilityPolicy, now: SystemTime) -> usize {
        let mut hidden = 0;

        for state in self.store.all() {
            let info = state.info();
            if info.hidden || !policy.should_hide(&info, now) {
                continue;
            }

            let after = state.set_hidden(true);
            info!("Visibility policy hid key {}", info.key_id);
            self.notify_if_changed(info.key_id, info.status, after);
            hidden += 1;
        }

        hidden
    }

    fn notify_if_changed(&self, key_id: KeyId, before: KeyStatus, after: KeyStatus) {
        if before == after {
            return;
        }
        debug!("Key {key_id} changed from {before} to {after}");
        let host = Arc::clone(&self.lock().host);
        host.on_key_status_changed(key_id, after);
    }

    fn state_locked(&self, inner: &FacadeInner) -> ServerStatus {
        if let Some(server) = &inner.server {
            return match server.phase() {
                LoopPhase::NotStarted | LoopPhase::Running => ServerStatus::Running,
                LoopPhase::StopRequested | LoopPhase::Stopped => ServerStatus::Stopping,
            };
        }

        if let Some(listener) = &inner.listener {
            return if listener.is_stop_requested() {
                ServerStatus::Stopping
            } else {
                ServerStatus::Running
            };
        }

        if self.service.is_listening() {
            ServerStatus::Blocked
        } else {
            ServerStatus::CanStart
        }
    }

    fn lock(&self) -> MutexGuard<'_, FacadeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
