// Unit tests for the dispatch table

use crate::error::server::KeyServerError;
use crate::framing::MessageFrame;
use crate::framing::message_code::{ERROR, KEEP_ALIVE, UNRECOGNIZED};
use crate::framing::messages::ErrorResponse;
use crate::ipc::{DispatchTable, HandlerContext, NoopHostCallbacks};
use crate::keys::{KeyStateStore, MemoryKeyChain};

use common::ErrorLocation;

use std::panic::Location;
use std::sync::Arc;

const ECHO: u32 = 100;
const FAILING: u32 = 101;
const PANICKING: u32 = 102;

fn echo(
    _context: &HandlerContext<'_>,
    request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    response.set_payload(ECHO, request.payload())?;
    Ok(())
}

fn failing(
    _context: &HandlerContext<'_>,
    _request: &MessageFrame,
    _response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    Err(KeyServerError::Handler {
        message: String::from("handler exploded"),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn panicking(
    _context: &HandlerContext<'_>,
    _request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    response.set_payload(PANICKING, b"half written")?;
    panic!("index out of range");
}

fn run(table: &DispatchTable, request: &MessageFrame) -> MessageFrame {
    let store = KeyStateStore::with_key_chain(Arc::new(MemoryKeyChain::new()));
    let host = NoopHostCallbacks;
    let context = HandlerContext {
        store: &store,
        host: &host,
    };
    let mut response = MessageFrame::outbound();
    table.dispatch(&context, request, &mut response);
    response
}

/// **VALUE**: Verifies that applications cannot take over protocol codes.
///
/// **BUG THIS CATCHES**: Would catch `register` silently replacing the
/// KEEP_ALIVE handler or claiming the ERROR code.
#[test]
fn given_reserved_code_when_register_then_refused_and_table_unchanged() {
    // GIVEN: The default table
    let mut table = DispatchTable::with_defaults();

    // WHEN: Registering handlers for reserved codes
    let keep_alive = table.register(KEEP_ALIVE, echo);
    let error = table.register(ERROR, echo);

    // THEN: Both are refused and keep-alive still answers with no content
    assert!(!keep_alive);
    assert!(!error);
    assert!(!table.contains(ERROR));
    let response = run(&table, &MessageFrame::no_content(KEEP_ALIVE));
    assert_eq!(response.code(), KEEP_ALIVE);
    assert!(response.payload().is_empty());
}

#[test]
fn given_application_code_when_registered_then_dispatched_to_handler() {
    // GIVEN: A table with an echo handler
    let mut table = DispatchTable::with_defaults();
    assert!(table.register(ECHO, echo));
    let mut request = MessageFrame::inbound();
    request.set_payload(ECHO, b"ping").expect("set payload");

    // WHEN: Dispatching a request for it
    let response = run(&table, &request);

    // THEN: The handler produced the response
    assert_eq!(response.code(), ECHO);
    assert_eq!(response.payload(), b"ping");
}

#[test]
fn given_unknown_code_when_dispatched_then_unrecognized_without_content() {
    // GIVEN: The default table
    let table = DispatchTable::with_defaults();

    // WHEN: Dispatching a code nobody handles
    let response = run(&table, &MessageFrame::no_content(4_242));

    // THEN: The reply is a bare UNRECOGNIZED
    assert_eq!(response.code(), UNRECOGNIZED);
    assert!(response.payload().is_empty());
}

/// **VALUE**: Verifies that a failing handler yields an ERROR frame.
///
/// **WHY THIS MATTERS**: Handler failures must reach the client as data.
/// Anything else leaves the client waiting for a response that never comes.
#[test]
fn given_failing_handler_when_dispatched_then_error_response() {
    // GIVEN: A table with a failing handler
    let mut table = DispatchTable::empty();
    assert!(table.register(FAILING, failing));

    // WHEN: Dispatching to it
    let response = run(&table, &MessageFrame::no_content(FAILING));

    // THEN: The client gets an ERROR frame describing the failure
    assert_eq!(response.code(), ERROR);
    let error: ErrorResponse = response.decode_payload().expect("error payload");
    assert_eq!(error.kind, "handler");
    assert!(error.message.contains("handler exploded"));
}

/// **VALUE**: A handler panic is turned into an ERROR response.
///
/// **BUG THIS CATCHES**: Would catch a panic escaping `dispatch`, or a
/// partially written response leaking out instead of the error.
#[test]
fn given_panicking_handler_when_dispatched_then_error_response_with_panic_message() {
    // GIVEN: A table with a handler that writes a payload and then panics
    let mut table = DispatchTable::with_defaults();
    assert!(table.register(PANICKING, panicking));

    // WHEN
    let response = run(&table, &MessageFrame::no_content(PANICKING));

    // THEN
    assert_eq!(response.code(), ERROR);
    let error: ErrorResponse = response.decode_payload().expect("error payload");
    assert_eq!(error.kind, "handler");
    assert!(error.message.contains("index out of range"), "message: {}", error.message);
}
