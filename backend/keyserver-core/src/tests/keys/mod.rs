mod policy;
mod state;
mod store;

use crate::keys::{KeyChain, KeyId, KeySeed, PassphraseRecovery, SeedLoader};

use common::RedactedSecret;

use std::fs::read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use zeroize::Zeroizing;

/// Seed that yields `key` when given `passphrase`.
pub(crate) struct PassphraseSeed {
    passphrase: Vec<u8>,
    key: Vec<u8>,
    attempts: AtomicUsize,
}

impl PassphraseSeed {
    pub(crate) fn new(passphrase: &str, key: &[u8]) -> Self {
        Self {
            passphrase: passphrase.as_bytes().to_vec(),
            key: key.to_vec(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl KeySeed for PassphraseSeed {
    fn passphrase_recovery(&self) -> Option<&dyn PassphraseRecovery> {
        Some(self)
    }
}

impl PassphraseRecovery for PassphraseSeed {
    fn try_resolve(&self, key_id: KeyId, secret: &RedactedSecret, key_chain: &dyn KeyChain) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if secret.expose() != self.passphrase.as_slice() {
            return false;
        }
        key_chain.insert(key_id, Zeroizing::new(self.key.clone()));
        true
    }
}

/// Seed without passphrase recovery.
pub(crate) struct OpaqueSeed;

impl KeySeed for OpaqueSeed {}

/// Loads a [`PassphraseSeed`] from files whose contents are `passphrase:key`.
pub(crate) struct ColonSeedLoader;

impl SeedLoader for ColonSeedLoader {
    fn load_seed(&self, _key_id: KeyId, path: &Path) -> Option<Arc<dyn KeySeed>> {
        let contents = String::from_utf8(read(path).ok()?).ok()?;
        let (passphrase, key) = contents.trim().split_once(':')?;
        Some(Arc::new(PassphraseSeed::new(passphrase, key.as_bytes())))
    }
}
