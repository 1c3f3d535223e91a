use crate::keys::{KeyChain, KeyId, KeySeed, KeyStateInfo, KeyStatus, SeedLoader};

use common::RedactedSecret;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use log::{debug, trace};

struct KeyStateData {
    hide_key: bool,
    seed: Option<Arc<dyn KeySeed>>,
    associated_files: HashMap<PathBuf, SystemTime>,
    last_registered: SystemTime,
    last_requested: Option<SystemTime>,
    last_served: Option<SystemTime>,
    last_associated: Option<SystemTime>,
}

/// Everything the server knows about one key.
///
/// Cloning yields another handle to the same state. Raw key bytes are never
/// stored here; they live in the shared [`KeyChain`] and are reached only
/// through [`use_key`](KeyState::use_key).
#[derive(Clone)]
pub struct KeyState {
    key_id: KeyId,
    key_chain: Arc<dyn KeyChain>,
    seed_loader: Arc<dyn SeedLoader>,
    data: Arc<Mutex<KeyStateData>>,
}

impl KeyState {
    pub(crate) fn new(
        key_id: KeyId,
        key_chain: Arc<dyn KeyChain>,
        seed_loader: Arc<dyn SeedLoader>,
    ) -> Self {
        Self {
            key_id,
            key_chain,
            seed_loader,
            data: Arc::new(Mutex::new(KeyStateData {
                hide_key: false,
                seed: None,
                associated_files: HashMap::new(),
                last_registered: SystemTime::now(),
                last_requested: None,
                last_served: None,
                last_associated: None,
            })),
        }
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// True if both handles refer to the same underlying state.
    pub fn same_state(&self, other: &KeyState) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn status(&self) -> KeyStatus {
        let data = self.lock();
        self.status_locked(&data)
    }

    pub fn is_hidden(&self) -> bool {
        self.lock().hide_key
    }

    /// Set the operator visibility override. Returns the resulting status.
    pub fn set_hidden(&self, hidden: bool) -> KeyStatus {
        let mut data = self.lock();
        data.hide_key = hidden;
        self.status_locked(&data)
    }

    pub fn has_seed(&self) -> bool {
        self.lock().seed.is_some()
    }

    /// Attach or detach the seed. The last writer wins.
    pub fn attach_seed(&self, seed: Option<Arc<dyn KeySeed>>) -> KeyStatus {
        let mut data = self.lock();
        data.seed = seed;
        self.status_locked(&data)
    }

    /// Make sure the key chain holds this key, recovering it with `secret`
    /// through the attached seed if needed.
    ///
    /// Returns `true` whenever the key is present afterwards, including when
    /// it already was (in which case the seed is not consulted).
    pub fn try_resolve(&self, secret: &RedactedSecret) -> bool {
        let seed = {
            let data = self.lock();
            if self.key_chain.contains(&self.key_id) {
                return true;
            }
            data.seed.clone()
        };

        let Some(seed) = seed else {
            debug!("Key {} has no seed to resolve from", self.key_id);
            return false;
        };

        let Some(recovery) = seed.passphrase_recovery() else {
            debug!("Seed for key {} does not support passphrase recovery", self.key_id);
            return false;
        };

        let resolved = recovery.try_resolve(self.key_id, secret, self.key_chain.as_ref());
        debug!("Resolution of key {} returned {resolved}", self.key_id);
        resolved
    }

    /// Record that `path` references this key.
    ///
    /// Rejects relative paths and paths that are not existing files. When no
    /// seed is attached and `try_load_seed` is set, the seed loader gets one
    /// attempt to derive a seed from the file.
    pub fn associate_file(&self, path: &Path, try_load_seed: bool) -> bool {
        if !path.is_absolute() {
            debug!("Rejecting relative association path {}", path.display());
            return false;
        }
        if !path.is_file() {
            debug!("Rejecting association with missing file {}", path.display());
            return false;
        }

        let now = SystemTime::now();
        let load_seed = {
            let mut data = self.lock();
            data.associated_files.insert(path.to_path_buf(), now);
            data.last_associated = Some(now);
            try_load_seed && data.seed.is_none()
        };

        if load_seed {
            match self.seed_loader.load_seed(self.key_id, path) {
                Some(seed) => {
                    let mut data = self.lock();
                    // Another writer may have attached one while the file was read.
                    if data.seed.is_none() {
                        data.seed = Some(seed);
                        debug!("Loaded seed for key {} from {}", self.key_id, path.display());
                    }
                }
                None => trace!("No seed derived from {}", path.display()),
            }
        }

        true
    }

    /// Lend the key bytes to `callback`.
    ///
    /// `callback` runs exactly once: with `Some(bytes)` if the key is visible
    /// and present in the key chain, otherwise with `None`. The bytes are
    /// borrowed from the key chain for the duration of the call. The key
    /// state lock is not held while `callback` runs.
    pub fn use_key<R>(&self, callback: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let hidden = {
            let mut data = self.lock();
            data.last_requested = Some(SystemTime::now());
            data.hide_key
        };

        let mut pending = Some(callback);
        let mut result = None;

        if !hidden {
            let served = self.key_chain.try_use(&self.key_id, &mut |_: &KeyId, key: &[u8]| {
                if let Some(callback) = pending.take() {
                    result = Some(callback(Some(key)));
                }
            });

            if served {
                self.lock().last_served = Some(SystemTime::now());
            }
        }

        match (result, pending) {
            (Some(result), _) => result,
            (None, Some(callback)) => callback(None),
            (None, None) => unreachable!("key callback consumed without a result"),
        }
    }

    pub fn associated_files(&self) -> Vec<(PathBuf, SystemTime)> {
        self.lock()
            .associated_files
            .iter()
            .map(|(path, at)| (path.clone(), *at))
            .collect()
    }

    pub fn association_count(&self) -> usize {
        self.lock().associated_files.len()
    }

    pub fn last_registered(&self) -> SystemTime {
        self.lock().last_registered
    }

    pub fn last_requested(&self) -> Option<SystemTime> {
        self.lock().last_requested
    }

    pub fn last_served(&self) -> Option<SystemTime> {
        self.lock().last_served
    }

    pub fn last_associated(&self) -> Option<SystemTime> {
        self.lock().last_associated
    }

    pub fn info(&self) -> KeyStateInfo {
        let data = self.lock();
        KeyStateInfo {
            key_id: self.key_id,
            status: self.status_locked(&data),
            hidden: data.hide_key,
            has_seed: data.seed.is_some(),
            associated_files: data.associated_files.len(),
            last_registered: data.last_registered,
            last_requested: data.last_requested,
            last_served: data.last_served,
            last_associated: data.last_associated,
        }
    }

    fn status_locked(&self, data: &KeyStateData) -> KeyStatus {
        if self.key_chain.contains(&self.key_id) {
            if data.hide_key {
                KeyStatus::Hidden
            } else {
                KeyStatus::Published
            }
        } else if data.seed.is_some() {
            KeyStatus::Seeded
        } else {
            KeyStatus::Unknown
        }
    }

    fn lock(&self) -> MutexGuard<'_, KeyStateData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
