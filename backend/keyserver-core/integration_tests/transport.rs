use crate::helpers::{TEST_BACKLOG, socket_path};

use keyserver_core::error::transport::TransportError;
use keyserver_core::transport::{ChannelService, StopToken};

use std::fs::write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;

/// **VALUE**: Verifies that disposing a listener removes its socket file and
/// that disposing twice is harmless.
///
/// **WHY THIS MATTERS**: Disposal runs from the loop's exit path and again
/// from `Drop`. A second removal could delete the socket of a server that
/// started on the same path in between.
///
/// **BUG THIS CATCHES**: Would catch the socket file outliving the listener,
/// or dispose not being idempotent.
#[tokio::test]
async fn given_bound_listener_when_disposed_twice_then_file_removed_once() {
    // GIVEN: A bound listener
    let dir = tempdir().expect("temp dir");
    let path = socket_path(&dir);
    let listener = ChannelService::new(&path)
        .bind_and_listen(TEST_BACKLOG)
        .expect("bind");
    assert!(path.exists(), "Socket file should exist while bound");

    // WHEN: Disposing twice
    listener.dispose();
    listener.dispose();

    // THEN: The file is gone and the listener reports disposal
    assert!(!path.exists());
    assert!(listener.is_disposed());
    assert!(listener.is_stop_requested());
}

#[tokio::test]
async fn given_live_listener_when_second_bind_then_address_in_use() {
    // GIVEN: A live listener on a path
    let dir = tempdir().expect("temp dir");
    let service = ChannelService::new(socket_path(&dir));
    let _listener = service.bind_and_listen(TEST_BACKLOG).expect("first bind");

    // WHEN: Binding the same path again
    let second = service.bind_and_listen(TEST_BACKLOG);

    // THEN: The second bind fails and the first socket is untouched
    assert!(matches!(second, Err(TransportError::AddressInUse { .. })));
    assert!(service.is_listening());
}

#[tokio::test]
async fn given_stale_file_at_path_when_bind_then_replaced() {
    // GIVEN: A leftover file where the socket should go
    let dir = tempdir().expect("temp dir");
    let path = socket_path(&dir);
    write(&path, b"stale").expect("write stale file");
    let service = ChannelService::new(&path);
    assert!(!service.is_listening());

    // WHEN: Binding
    let listener = service.bind_and_listen(TEST_BACKLOG);

    // THEN: The bind succeeds and the path answers
    if let Err(e) = &listener {
        panic!("Stale file should be replaced: {e}");
    }
    assert!(service.is_listening());
}

/// **VALUE**: Verifies that a stop request interrupts an accept that is
/// already waiting.
///
/// **BUG THIS CATCHES**: Would catch `request_stop` only being checked before
/// accepting, which leaves shutdown hanging until the next client arrives.
#[tokio::test]
async fn given_pending_accept_when_stop_requested_then_returns_none_promptly() {
    // GIVEN: A listener with an accept in flight
    let dir = tempdir().expect("temp dir");
    let listener = Arc::new(
        ChannelService::new(socket_path(&dir))
            .bind_and_listen(TEST_BACKLOG)
            .expect("bind"),
    );
    let stop = StopToken::new();
    let accepting = {
        let listener = Arc::clone(&listener);
        let stop = stop.clone();
        tokio::spawn(async move { listener.accept(&stop).await.map(|endpoint| endpoint.is_some()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // WHEN: Requesting a stop
    stop.request();

    // THEN: The accept finishes without a connection
    let accepted = timeout(Duration::from_secs(2), accepting)
        .await
        .expect("accept should return promptly")
        .expect("accept task")
        .expect("accept result");
    assert!(!accepted);
}

#[tokio::test]
async fn given_no_socket_when_connect_then_not_found() {
    // GIVEN: A path nobody bound
    let dir = tempdir().expect("temp dir");
    let service = ChannelService::new(socket_path(&dir));

    // WHEN: Connecting
    let result = service.connect(&StopToken::new()).await;

    // THEN: The failure says why
    assert!(matches!(result, Err(TransportError::NotFound { .. })));
}
