use crate::keys::{KeyChain, KeyId};

use common::RedactedSecret;

use std::path::Path;
use std::sync::Arc;

/// Descriptor that may be able to recover a key's raw bytes.
///
/// Seeds come from the vault layer; this crate never looks inside them. A seed
/// advertises passphrase recovery through
/// [`passphrase_recovery`](KeySeed::passphrase_recovery), and callers must
/// handle seeds that do not support it.
pub trait KeySeed: Send + Sync {
    fn passphrase_recovery(&self) -> Option<&dyn PassphraseRecovery> {
        None
    }
}

/// Passphrase-based recovery capability of a [`KeySeed`].
pub trait PassphraseRecovery: Send + Sync {
    /// Try to recover the key for `key_id` with `secret` and store it in
    /// `key_chain`. The key chain's contents afterwards decide success.
    fn try_resolve(&self, key_id: KeyId, secret: &RedactedSecret, key_chain: &dyn KeyChain) -> bool;
}

/// Derives seeds from files that reference a key.
pub trait SeedLoader: Send + Sync {
    /// Best effort: `None` if no seed can be derived from `path`.
    fn load_seed(&self, key_id: KeyId, path: &Path) -> Option<Arc<dyn KeySeed>>;
}

/// Loader for deployments where seeds only arrive through explicit attachment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSeedLoader;

impl SeedLoader for NoSeedLoader {
    fn load_seed(&self, _key_id: KeyId, _path: &Path) -> Option<Arc<dyn KeySeed>> {
        None
    }
}
