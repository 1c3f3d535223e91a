use crate::error::server::KeyServerError;
use crate::framing::MessageFrame;
use crate::framing::message_code::{
    ASSOCIATE_FILE, KEEP_ALIVE, LIST_KEYS, QUERY_KEY_STATUS, REQUEST_KEY, UNRECOGNIZED, is_reserved,
    name,
};
use crate::ipc::HostCallbacks;
use crate::ipc::handlers;
use crate::keys::KeyStateStore;

use common::ErrorLocation;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, Location, catch_unwind};

use log::{debug, warn};

/// What a handler can reach while serving one request.
pub struct HandlerContext<'a> {
    pub store: &'a KeyStateStore,
    pub host: &'a dyn HostCallbacks,
}

/// Fills `response` for `request`.
///
/// Handlers are plain synchronous functions, so no key state is ever held
/// across an await point.
pub type HandlerFn =
    fn(&HandlerContext<'_>, &MessageFrame, &mut MessageFrame) -> Result<(), KeyServerError>;

/// Message code to handler lookup, built once per server.
#[derive(Clone)]
pub struct DispatchTable {
    handlers: HashMap<u32, HandlerFn>,
}

impl DispatchTable {
    /// Table without any handlers. Every request is answered `UNRECOGNIZED`.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Table with the built-in key server requests.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.handlers.insert(KEEP_ALIVE, handlers::keep_alive);
        table.handlers.insert(QUERY_KEY_STATUS, handlers::query_key_status);
        table.handlers.insert(ASSOCIATE_FILE, handlers::associate_file);
        table.handlers.insert(REQUEST_KEY, handlers::request_key);
        table.handlers.insert(LIST_KEYS, handlers::list_keys);
        table
    }

    /// Add or replace the handler for an application code.
    ///
    /// Returns `false`, leaving the table untouched, for reserved codes.
    pub fn register(&mut self, code: u32, handler: HandlerFn) -> bool {
        if is_reserved(code) {
            warn!("Refusing to register handler for reserved code {code}");
            return false;
        }

        if self.handlers.insert(code, handler).is_some() {
            debug!("Replaced handler for code {code}");
        }
        true
    }

    pub fn get(&self, code: u32) -> Option<HandlerFn> {
        self.handlers.get(&code).copied()
    }

    pub fn contains(&self, code: u32) -> bool {
        self.handlers.contains_key(&code)
    }

    /// Produce the response for `request` into `response`.
    ///
    /// Never fails: unknown codes are answered with `UNRECOGNIZED`, handler
    /// errors and handler panics with an `ERROR` frame.
    pub fn dispatch(
        &self,
        context: &HandlerContext<'_>,
        request: &MessageFrame,
        response: &mut MessageFrame,
    ) {
        let code = request.code();
        response.clear();

        let Some(handler) = self.get(code) else {
            debug!("No handler for code {code}");
            response.set_no_content(UNRECOGNIZED);
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(context, request, response)))
            .unwrap_or_else(|panic| {
                Err(KeyServerError::Handler {
                    message: format!(
                        "Handler for {} ({code}) panicked: {}",
                        name(code),
                        panic_message(panic.as_ref())
                    ),
                    location: ErrorLocation::from(Location::caller()),
                })
            });

        if let Err(e) = outcome {
            warn!("Handler for {} ({code}) failed: {e}", name(code));
            response.set_error_response(&e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("DispatchTable").field("codes", &codes).finish()
    }
}
