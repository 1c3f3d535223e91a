//! Per-key state and the registry that owns it.
//!
//! # Locking
//!
//! Two levels, never nested: the [`KeyStateStore`] map lock guards structural
//! changes (insert, remove, snapshot), and every [`KeyState`] has its own lock
//! for its fields. The store lock is always released before a key lock is
//! taken. A key lock may be held while asking the [`KeyChain`] whether it
//! contains a key, but never while the key chain runs a caller's callback.

mod chain;
mod info;
mod key_id;
mod policy;
mod seed;
mod state;
mod status;
mod store;

pub use chain::{KeyChain, MemoryKeyChain};
pub use info::KeyStateInfo;
pub use key_id::KeyId;
pub use policy::{IdleHidePolicy, NeverHide, VisibilityPolicy};
pub use seed::{KeySeed, NoSeedLoader, PassphraseRecovery, SeedLoader};
pub use state::KeyState;
pub use status::KeyStatus;
pub use store::KeyStateStore;
