// Integration tests for the daemon run loop against a real socket

use keyserverd::daemon::{run, run_with};
use keyserverd::error::KeyServerDaemonError;
use keyserverd::host::LoggingHostCallbacks;

use keyserver_core::config::ServerConfig;
use keyserver_core::ipc::KeyServerClient;
use keyserver_core::keys::{KeyChain, KeyId, KeyStatus, MemoryKeyChain, NoSeedLoader};
use keyserver_core::transport::ChannelService;

use std::fs::write;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use zeroize::Zeroizing;

const READY_ATTEMPTS: usize = 100;
const READY_DELAY: Duration = Duration::from_millis(20);

fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        socket_path: Some(dir.path().join("ks.sock")),
        stop_timeout_ms: 2_000,
        policy_sweep_interval_ms: 50,
        ..ServerConfig::default()
    }
}

type DaemonHandle = JoinHandle<Result<(), KeyServerDaemonError>>;

fn spawn_daemon(config: ServerConfig) -> (oneshot::Sender<()>, DaemonHandle) {
    spawn_with(|shutdown| run(config, shutdown))
}

fn spawn_with<F, Fut>(start: F) -> (oneshot::Sender<()>, DaemonHandle)
where
    F: FnOnce(Pin<Box<dyn Future<Output = ()> + Send>>) -> Fut,
    Fut: Future<Output = Result<(), KeyServerDaemonError>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(start(Box::pin(async move {
        let _ = shutdown_rx.await;
    })));
    (shutdown_tx, handle)
}

async fn wait_until_serving(path: &Path) -> KeyServerClient {
    let client = KeyServerClient::new(ChannelService::new(path));
    for _ in 0..READY_ATTEMPTS {
        if client.keep_alive().await.is_ok() {
            return client;
        }
        sleep(READY_DELAY).await;
    }
    panic!("daemon never started serving {}", path.display());
}

/// **VALUE**: The daemon serves clients until told to stop, then cleans up.
///
/// **WHY THIS MATTERS**: SIGTERM from a service manager must not leave a stale
/// socket behind; the next start would otherwise have to clear it.
///
/// **BUG THIS CATCHES**: Would catch a shutdown path that returns before the
/// control loop has disposed of the listener.
#[tokio::test]
async fn given_running_daemon_when_shutdown_signalled_then_stops_and_removes_socket() {
    // GIVEN
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let socket = config.socket_path();
    let (shutdown, handle) = spawn_daemon(config);
    let client = wait_until_serving(&socket).await;

    // WHEN
    let status = client.query_status(KeyId::new_random()).await.unwrap();
    shutdown.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon did not finish")
        .expect("daemon task panicked");

    // THEN
    assert_eq!(status, KeyStatus::Unknown);
    assert!(result.is_ok(), "unexpected daemon error: {result:?}");
    assert!(!socket.exists(), "socket file should be removed");
    assert!(client.keep_alive().await.is_err());
}

/// **VALUE**: A second daemon on the same path refuses to start.
///
/// **BUG THIS CATCHES**: Would catch the second daemon deleting the live
/// socket file and stealing the channel from the first.
#[tokio::test]
async fn given_serving_daemon_when_second_daemon_starts_then_reports_blocked() {
    // GIVEN
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let socket = config.socket_path();
    let (shutdown, handle) = spawn_daemon(config.clone());
    let client = wait_until_serving(&socket).await;

    // WHEN
    let second = run(config, std::future::pending()).await;

    // THEN
    match second {
        Err(KeyServerDaemonError::Daemon { message, .. }) => {
            assert!(message.contains("blocked"), "unexpected message: {message}");
        }
        other => panic!("expected blocked daemon error, got {other:?}"),
    }
    assert!(client.keep_alive().await.is_ok(), "first daemon must keep serving");

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());
}

/// **VALUE**: An application that owns the key side can serve keys through
/// the daemon loop.
///
/// **WHY THIS MATTERS**: The stock binary has no way to resolve keys; the
/// library entry point is how a real key chain gets behind the socket.
///
/// **BUG THIS CATCHES**: Would catch `run_with` ignoring the supplied key
/// chain and serving from a private empty one.
#[tokio::test]
async fn given_supplied_key_chain_when_daemon_runs_then_client_receives_key() {
    // GIVEN: A key chain that already holds a key and a file referencing it
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let socket = config.socket_path();
    let key_id = KeyId::new_random();
    let key_chain = Arc::new(MemoryKeyChain::new());
    key_chain.insert(key_id, Zeroizing::new(b"vault key".to_vec()));
    let vault_file = dir.path().join("notes.vault");
    write(&vault_file, b"ciphertext").unwrap();

    let (shutdown, handle) = spawn_with(|stop| {
        run_with(
            config,
            key_chain,
            Arc::new(NoSeedLoader),
            Arc::new(LoggingHostCallbacks),
            stop,
        )
    });
    let client = wait_until_serving(&socket).await;

    // WHEN: A client registers the file and asks for the key
    let (accepted, status) = client.associate_file(key_id, &vault_file, false).await.unwrap();
    let (served_status, key) = client
        .request_key(key_id, Some(&vault_file), |key| key.map(<[u8]>::to_vec))
        .await
        .unwrap();

    // THEN: The key is published and served
    assert!(accepted);
    assert_eq!(status, KeyStatus::Published);
    assert_eq!(served_status, KeyStatus::Published);
    assert_eq!(key.as_deref(), Some(b"vault key".as_slice()));

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn given_invalid_config_when_running_then_core_error_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        listen_backlog: 0,
        ..test_config(&dir)
    };
    let socket = config.socket_path();

    let result = run(config, std::future::ready(())).await;

    assert!(matches!(result, Err(KeyServerDaemonError::Core { .. })));
    assert!(!socket.exists());
}

#[tokio::test]
async fn given_bad_auto_hide_duration_when_running_then_core_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        auto_hide_after: Some(String::from("soon")),
        ..test_config(&dir)
    };

    let result = run(config, std::future::ready(())).await;

    assert!(matches!(result, Err(KeyServerDaemonError::Core { .. })));
}
