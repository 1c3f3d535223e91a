use crate::keys::{KeyId, KeyStatus};

use std::time::SystemTime;

/// Point-in-time copy of a key state's metadata. Never contains key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStateInfo {
    pub key_id: KeyId,
    pub status: KeyStatus,
    pub hidden: bool,
    pub has_seed: bool,
    pub associated_files: usize,
    pub last_registered: SystemTime,
    pub last_requested: Option<SystemTime>,
    pub last_served: Option<SystemTime>,
    pub last_associated: Option<SystemTime>,
}
