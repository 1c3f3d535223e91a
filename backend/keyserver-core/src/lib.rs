//! Engine of the key server: a local daemon that holds resolved vault keys in
//! memory and lends them to cooperating processes over a Unix socket.
//!
//! Layers, leaves first:
//!
//! - [`transport`] - Unix socket channel with cooperative cancellation
//! - [`framing`] - code + length-prefixed payload frames
//! - [`keys`] - per-key state machine and the registry that owns it
//! - [`ipc`] - control loop, request handlers, facade and client
//!
//! [`vault`] binds vault directories to key ids and [`config`] holds the
//! daemon settings.

pub mod config;
pub mod error;
pub mod framing;
pub mod ipc;
pub mod keys;
pub mod transport;
pub mod vault;

#[cfg(test)]
mod tests;
