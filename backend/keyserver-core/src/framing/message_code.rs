//! Numeric message codes carried in the frame header.
//!
//! Codes below [`FIRST_APPLICATION_CODE`] are reserved for the core and cannot
//! be re-registered by an embedding application.

/// No-content round trip. The response echoes the code with an empty payload.
pub const KEEP_ALIVE: u32 = 0;

/// No-content reply to a request whose code has no handler.
pub const UNRECOGNIZED: u32 = 1;

/// Reply carrying an [`ErrorResponse`](crate::framing::messages::ErrorResponse).
pub const ERROR: u32 = 2;

pub const FIRST_APPLICATION_CODE: u32 = 16;

pub const QUERY_KEY_STATUS: u32 = 16;
pub const ASSOCIATE_FILE: u32 = 17;
pub const REQUEST_KEY: u32 = 18;
pub const LIST_KEYS: u32 = 19;

pub fn is_reserved(code: u32) -> bool {
    code < FIRST_APPLICATION_CODE
}

/// Human-readable name for logging.
pub fn name(code: u32) -> &'static str {
    match code {
        KEEP_ALIVE => "keep_alive",
        UNRECOGNIZED => "unrecognized",
        ERROR => "error",
        QUERY_KEY_STATUS => "query_key_status",
        ASSOCIATE_FILE => "associate_file",
        REQUEST_KEY => "request_key",
        LIST_KEYS => "list_keys",
        _ => "application",
    }
}
