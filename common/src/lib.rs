//! Shared building blocks for the key server workspace.
//!
//! Everything in here is dependency-light and used by both the
//! `keyserver-core` engine and the `keyserverd` daemon:
//!
//! - [`ErrorLocation`] - file/line/column captured at error construction
//! - [`RedactedSecret`] - user-supplied secret that never leaks into logs

pub mod error;
pub mod redacted_secret;

pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use redacted_secret::RedactedSecret;
