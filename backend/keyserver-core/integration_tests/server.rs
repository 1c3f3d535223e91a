use crate::helpers::{HostEvent, STOP_TIMEOUT, TEST_BACKLOG, TestServer, socket_path};

use keyserver_core::error::client::ClientError;
use keyserver_core::error::server::KeyServerError;
use keyserver_core::framing::MessageFrame;
use keyserver_core::framing::message_code::{ERROR, UNRECOGNIZED};
use keyserver_core::framing::messages::ErrorResponse;
use keyserver_core::ipc::{
    DispatchTable, HandlerContext, KeyServer, KeyServerFacade, LoopPhase, NoopHostCallbacks,
    ServerStatus,
};
use keyserver_core::keys::{KeyStateStore, MemoryKeyChain};
use keyserver_core::transport::ChannelService;

use common::ErrorLocation;

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

const FAILING: u32 = 200;
const PANICKING: u32 = 201;

fn failing(
    _context: &HandlerContext<'_>,
    _request: &MessageFrame,
    _response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    Err(KeyServerError::Handler {
        message: String::from("boom"),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn panicking(
    _context: &HandlerContext<'_>,
    _request: &MessageFrame,
    _response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    panic!("handler bug");
}

/// **VALUE**: End-to-end keep-alive through the real socket.
///
/// **WHY THIS MATTERS**: Keep-alive is how clients detect a live daemon.
/// It exercises accept, fill, dispatch and emit in one round trip.
#[tokio::test]
async fn given_running_server_when_keep_alive_sent_then_empty_keep_alive_returned() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: A client sends keep-alive
    let result = server.client().keep_alive().await;

    // THEN: The round trip succeeds
    assert!(result.is_ok(), "Keep-alive failed: {:?}", result.err());
    assert!(server.stop().await);
}

#[tokio::test]
async fn given_running_server_when_unknown_code_sent_then_unrecognized_returned() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: A client sends a code without a handler
    let mut request = MessageFrame::no_content(9_999);
    let response = server
        .client()
        .send_raw(&mut request)
        .await
        .expect("round trip");

    // THEN: The server answers UNRECOGNIZED
    assert_eq!(response.code(), UNRECOGNIZED);
    assert!(response.payload().is_empty());
    assert!(server.stop().await);
}

/// **VALUE**: Verifies that a failing handler produces an ERROR response
/// and that the loop keeps serving afterwards.
///
/// **BUG THIS CATCHES**: Would catch a handler error tearing down the accept
/// loop, which would take the daemon offline for every client.
#[tokio::test]
async fn given_failing_handler_when_called_then_error_response_and_server_keeps_serving() {
    // GIVEN: A server with a failing application handler
    let mut table = DispatchTable::with_defaults();
    assert!(table.register(FAILING, failing));
    let server = TestServer::with_dispatch_table(table);
    server.start().await;
    let client = server.client();

    // WHEN: Calling the failing handler
    let mut request = MessageFrame::no_content(FAILING);
    let response = client.send_raw(&mut request).await.expect("round trip");

    // THEN: An ERROR frame comes back and the next request still works
    assert_eq!(response.code(), ERROR);
    assert!(client.keep_alive().await.is_ok());
    assert!(server.stop().await);
}

/// **VALUE**: Verifies that a panicking handler is answered like a failing
/// one and leaves the server running.
///
/// **WHY THIS MATTERS**: Embedding applications register their own handlers.
/// A bug in one of them must cost one request, not the whole channel.
///
/// **BUG THIS CATCHES**: Would catch the panic unwinding the loop task, which
/// disposes the listener and leaves the facade reporting Stopping although
/// nobody asked for a stop.
#[tokio::test]
async fn given_panicking_handler_when_called_then_error_response_and_server_keeps_serving() {
    // GIVEN: A server with a panicking application handler
    let mut table = DispatchTable::with_defaults();
    assert!(table.register(PANICKING, panicking));
    let server = TestServer::with_dispatch_table(table);
    server.start().await;
    let client = server.client();

    // WHEN: Calling the panicking handler
    let mut request = MessageFrame::no_content(PANICKING);
    let response = client.send_raw(&mut request).await.expect("round trip");

    // THEN: An ERROR frame names the handler failure and the server still answers
    assert_eq!(response.code(), ERROR);
    let error: ErrorResponse = response.decode_payload().expect("error payload");
    assert_eq!(error.kind, "handler");
    assert!(error.message.contains("handler bug"), "message: {}", error.message);
    assert!(client.keep_alive().await.is_ok());
    assert_eq!(server.facade.server_state(), ServerStatus::Running);
    assert!(server.stop().await);
}

/// **VALUE**: Verifies that a client which connects and never writes is
/// dropped after the request timeout.
///
/// **WHY THIS MATTERS**: Requests are served one at a time. Without a limit
/// a single stalled process would lock every other client out.
///
/// **BUG THIS CATCHES**: Would catch an unbounded request read.
#[tokio::test]
async fn given_silent_client_when_request_timeout_passes_then_next_client_is_served() {
    // GIVEN: A server with a short request timeout and a client that sends nothing
    let server = TestServer::with_request_timeout(Duration::from_millis(200));
    server.start().await;
    let mut silent = UnixStream::connect(server.socket_path())
        .await
        .expect("connect");

    // WHEN: Another client calls after it
    let result = timeout(Duration::from_secs(3), server.client().keep_alive()).await;

    // THEN: The call is served and the silent connection was closed unanswered
    assert!(matches!(result, Ok(Ok(()))), "keep-alive result: {result:?}");
    let mut reply = Vec::new();
    let read = timeout(Duration::from_secs(1), silent.read_to_end(&mut reply)).await;
    assert!(matches!(read, Ok(Ok(0))), "silent read: {read:?}");
    assert!(server.stop().await);
}

#[tokio::test]
async fn given_truncated_frame_when_sent_then_connection_dropped_and_server_keeps_serving() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: A client sends half a header and closes its write side
    let mut stream = UnixStream::connect(server.socket_path())
        .await
        .expect("connect");
    stream.write_all(&[0, 0, 0]).await.expect("write");
    stream.shutdown().await.expect("shutdown");
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.expect("read");

    // THEN: No response is sent and the server still answers
    assert!(reply.is_empty());
    assert!(server.client().keep_alive().await.is_ok());
    assert!(server.stop().await);
}

/// **VALUE**: Verifies that starting twice is a no-op that reports Running.
///
/// **WHY THIS MATTERS**: Hosts call `start_server` on every launch. A second
/// call must not bind a second listener or announce a second start.
#[tokio::test]
async fn given_running_server_when_started_again_then_running_without_second_start() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: Starting it again
    let status = server
        .facade
        .start_server(server.host.clone())
        .await
        .expect("second start");

    // THEN: The status is Running and only one start was announced
    assert_eq!(status, ServerStatus::Running);
    assert_eq!(server.host.server_events(), vec![ServerStatus::Running]);
    assert!(server.client().keep_alive().await.is_ok());
    assert!(server.stop().await);
}

/// **VALUE**: Stop and wait on an idle server, then restart.
///
/// **WHY THIS MATTERS**: A stop that does not complete, or that leaves the
/// socket file behind, blocks the next daemon start.
///
/// **BUG THIS CATCHES**: Would catch the loop not observing the stop while
/// parked in accept, stop completion never being published, or the facade
/// keeping the old loop so a restart reports Stopping forever.
#[tokio::test]
async fn given_idle_server_when_stopped_and_waited_then_can_start_and_restarts() {
    // GIVEN: An idle running server
    let server = TestServer::started().await;

    // WHEN: Stopping and waiting up to five seconds
    server.facade.stop_server();
    let stopped = server.facade.wait_for_server_stop(STOP_TIMEOUT).await;

    // THEN: The stop completes, the socket is gone and the path is free again
    assert!(stopped);
    assert_eq!(server.facade.server_state(), ServerStatus::CanStart);
    assert!(!server.socket_path().exists());

    server.start().await;
    assert!(server.client().keep_alive().await.is_ok());
    assert!(server.stop().await);
}

#[tokio::test]
async fn given_path_served_by_other_owner_when_state_queried_then_blocked() {
    // GIVEN: A server running on a path
    let owner = TestServer::started().await;

    // WHEN: A second facade looks at the same path
    let other = KeyServerFacade::new(
        ChannelService::new(owner.socket_path()),
        TEST_BACKLOG,
        KeyStateStore::with_key_chain(Arc::new(MemoryKeyChain::new())),
    );
    let state = other.server_state();
    let start = other
        .start_server(Arc::new(NoopHostCallbacks))
        .await
        .expect("start reports state");

    // THEN: It reports Blocked and does not disturb the owner
    assert_eq!(state, ServerStatus::Blocked);
    assert_eq!(start, ServerStatus::Blocked);
    assert!(owner.client().keep_alive().await.is_ok());
    assert!(owner.stop().await);
}

#[tokio::test]
async fn given_loop_never_started_when_waited_then_stops_immediately() {
    // GIVEN: A bound listener wrapped in a loop that was never started
    let dir = tempdir().expect("temp dir");
    let path = socket_path(&dir);
    let listener = Arc::new(
        ChannelService::new(&path)
            .bind_and_listen(TEST_BACKLOG)
            .expect("bind"),
    );
    let server = KeyServer::new(
        listener,
        KeyStateStore::with_key_chain(Arc::new(MemoryKeyChain::new())),
        Arc::new(DispatchTable::with_defaults()),
        Arc::new(NoopHostCallbacks),
    );

    // WHEN: Waiting for it to stop
    let stopped = server.wait_for_stop(Duration::from_millis(100)).await;

    // THEN: It is stopped, its socket released, and it cannot be started
    assert!(stopped);
    assert_eq!(server.phase(), LoopPhase::Stopped);
    assert!(!path.exists());
    assert_eq!(server.start().await, LoopPhase::Stopped);
}

#[tokio::test]
async fn given_stopped_server_when_client_calls_then_transport_error() {
    // GIVEN: A server that has been stopped
    let server = TestServer::started().await;
    assert!(server.stop().await);

    // WHEN: A client calls it
    let result = server.client().keep_alive().await;

    // THEN: The call fails at the transport
    assert!(matches!(result, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn given_server_lifecycle_when_run_then_host_sees_running_then_can_start() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: Stopping it
    assert!(server.stop().await);

    // THEN: The host saw the start and the final state
    let events = server.host.events();
    assert_eq!(events.first(), Some(&HostEvent::ServerStatus(ServerStatus::Running)));
    assert_eq!(events.last(), Some(&HostEvent::ServerStatus(ServerStatus::CanStart)));
}

/// **VALUE**: Repeated stop calls notify the host once.
///
/// **BUG THIS CATCHES**: Would catch `stop_server` reporting Stopping on every
/// call, which hosts would show as a new transition each time.
#[tokio::test]
async fn given_stopping_server_when_stopped_again_then_host_notified_once() {
    // GIVEN: A running server
    let server = TestServer::started().await;

    // WHEN: Asking it to stop twice before waiting
    let first = server.facade.stop_server();
    let second = server.facade.stop_server();
    assert!(server.stop().await);

    // THEN: Both calls report Stopping and the host saw each change once
    assert_eq!(first, ServerStatus::Stopping);
    assert_eq!(second, ServerStatus::Stopping);
    assert_eq!(
        server.host.server_events(),
        vec![
            ServerStatus::Running,
            ServerStatus::Stopping,
            ServerStatus::CanStart
        ]
    );
}
