//! Protobuf payloads carried inside frames, generated from
//! `proto/keyserver.proto`.
//!
//! Key ids travel as their 16 raw bytes. Timestamps travel as milliseconds
//! since the Unix epoch. Key statuses travel as
//! [`KeyStatus::as_wire`](crate::keys::KeyStatus::as_wire) values.

use std::fmt;

use zeroize::Zeroize;

include!(concat!(env!("OUT_DIR"), "/keyserver.rs"));

impl fmt::Debug for KeyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResponse")
            .field("status", &self.status)
            .field("present", &self.present)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Drop for KeyResponse {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
