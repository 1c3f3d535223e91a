use crate::keys::KeyId;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::debug;
use zeroize::Zeroizing;

/// Store of resolved raw key bytes, shared by every key state.
///
/// Key bytes are only ever lent out through [`try_use`](KeyChain::try_use);
/// no method returns them by value.
pub trait KeyChain: Send + Sync {
    fn contains(&self, key_id: &KeyId) -> bool;

    /// Run `use_key` with a borrowed view of the key if present.
    ///
    /// Returns whether the callback ran. The borrow ends when the callback
    /// returns. Implementations may hold internal locks while it runs, so the
    /// callback must not call back into the key chain.
    fn try_use(&self, key_id: &KeyId, use_key: &mut dyn FnMut(&KeyId, &[u8])) -> bool;

    /// Store a resolved key, replacing (and wiping) any previous bytes.
    fn insert(&self, key_id: KeyId, key: Zeroizing<Vec<u8>>);

    fn remove(&self, key_id: &KeyId) -> bool;
}

/// In-process key chain. Buffers are wiped when replaced, removed or dropped.
#[derive(Default)]
pub struct MemoryKeyChain {
    keys: RwLock<HashMap<KeyId, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyChain for MemoryKeyChain {
    fn contains(&self, key_id: &KeyId) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key_id)
    }

    fn try_use(&self, key_id: &KeyId, use_key: &mut dyn FnMut(&KeyId, &[u8])) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        match keys.get(key_id) {
            Some(key) => {
                use_key(key_id, key.as_slice());
                true
            }
            None => false,
        }
    }

    fn insert(&self, key_id: KeyId, key: Zeroizing<Vec<u8>>) {
        debug!("Key chain storing key {key_id} ({} bytes)", key.len());
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key_id, key);
    }

    fn remove(&self, key_id: &KeyId) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key_id)
            .is_some()
    }
}
