use crate::keys::{KeyChain, KeyId, KeyState, KeyStateInfo, NoSeedLoader, SeedLoader};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

/// Thread-safe registry of [`KeyState`]s.
///
/// This type is `Clone`; all clones share the same registry. Handles returned
/// by lookups stay valid after the store lock is released, but the state they
/// point to may have been removed from the registry in the meantime.
#[derive(Clone)]
pub struct KeyStateStore {
    key_chain: Arc<dyn KeyChain>,
    seed_loader: Arc<dyn SeedLoader>,
    states: Arc<Mutex<HashMap<KeyId, KeyState>>>,
}

impl KeyStateStore {
    pub fn new(key_chain: Arc<dyn KeyChain>, seed_loader: Arc<dyn SeedLoader>) -> Self {
        Self {
            key_chain,
            seed_loader,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store whose key states never derive seeds from associated files.
    pub fn with_key_chain(key_chain: Arc<dyn KeyChain>) -> Self {
        Self::new(key_chain, Arc::new(NoSeedLoader))
    }

    pub fn key_chain(&self) -> &Arc<dyn KeyChain> {
        &self.key_chain
    }

    /// Return the state for `key_id`, registering a fresh one if needed.
    pub fn get_or_create(&self, key_id: KeyId) -> KeyState {
        let mut states = self.lock();
        states
            .entry(key_id)
            .or_insert_with(|| {
                info!("Registering key {key_id}");
                KeyState::new(
                    key_id,
                    Arc::clone(&self.key_chain),
                    Arc::clone(&self.seed_loader),
                )
            })
            .clone()
    }

    pub fn find(&self, key_id: &KeyId) -> Option<KeyState> {
        self.lock().get(key_id).cloned()
    }

    pub fn remove(&self, key_id: &KeyId) -> Option<KeyState> {
        let removed = self.lock().remove(key_id);
        if removed.is_some() {
            debug!("Removed key {key_id} from registry");
        }
        removed
    }

    /// Snapshot of every registered state, safe to iterate without the lock.
    pub fn all(&self) -> Vec<KeyState> {
        self.lock().values().cloned().collect()
    }

    /// Snapshot of every registered state's metadata, sorted by key id.
    pub fn infos(&self) -> Vec<KeyStateInfo> {
        let mut infos: Vec<_> = self.all().iter().map(KeyState::info).collect();
        infos.sort_by_key(|info| info.key_id);
        infos
    }

    pub fn has(&self, key_id: &KeyId) -> bool {
        self.lock().contains_key(key_id)
    }

    pub fn any(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.any()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<KeyId, KeyState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
