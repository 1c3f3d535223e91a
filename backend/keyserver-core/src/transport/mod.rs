//! Local channel transport over Unix domain sockets.
//!
//! Four roles make up a channel:
//!
//! - [`ChannelService`] - the filesystem path that names the channel
//! - [`ChannelListener`] - the bound, listening socket (server side)
//! - [`ChannelEndpoint`] - one connected stream, used by both server and client
//! - [`StopToken`] - the cancellation source every suspending call observes
//!
//! # Socket file ownership
//!
//! The socket file is removed in exactly one place: [`ChannelListener::dispose`]
//! (also run on drop). Binding deletes a stale file only after probing that
//! nobody is listening on it, so a live server is never unlinked by a second
//! process.

mod endpoint;
mod listener;
mod service;
mod stop_token;

pub use endpoint::ChannelEndpoint;
pub use listener::ChannelListener;
pub use service::ChannelService;
pub use stop_token::StopToken;
