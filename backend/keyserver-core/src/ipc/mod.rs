//! Key server IPC: the control loop, its request handlers, the facade that
//! manages it and a client for talking to it.
//!
//! # Protocol
//!
//! One request frame per connection, answered with one response frame. See
//! [`crate::framing::message_code`] for the codes and
//! [`crate::framing::messages`] for the payloads.
//!
//! # Lookup policy
//!
//! Key states are only created by `ASSOCIATE_FILE` (and by the operator API
//! on the facade). Status, key and list requests never register a key.

mod client;
mod dispatch;
mod facade;
mod handlers;
mod host;
mod server;

pub use client::KeyServerClient;
pub use dispatch::{DispatchTable, HandlerContext, HandlerFn};
pub use facade::{KeyServerFacade, ServerStatus};
pub use host::{HostCallbacks, NoopHostCallbacks};
pub use server::{DEFAULT_REQUEST_TIMEOUT, KeyServer, LoopPhase};
