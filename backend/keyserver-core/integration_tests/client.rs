use crate::helpers::{HostEvent, PassphraseSeed, TestServer};

use keyserver_core::keys::{KeyId, KeySeed, KeyStatus};

use common::RedactedSecret;

use std::fs::write;
use std::sync::Arc;

/// **VALUE**: Walks a key through its whole life over the socket: associate,
/// load request, seed, resolve, serve, hide.
///
/// **WHY THIS MATTERS**: This is the path every vault open takes. Each step
/// depends on the one before, so a regression anywhere shows up here.
///
/// **BUG THIS CATCHES**: Would catch a hidden key still being served, the
/// host missing a load request, or status changes not being announced.
#[tokio::test]
async fn given_vault_key_when_driven_through_lifecycle_then_served_only_while_published() {
    // GIVEN: A running server, a client and a vault file
    let server = TestServer::started().await;
    let client = server.client();
    let key_id = KeyId::new_random();
    let vault_file = server.dir.path().join("notes.vault");
    write(&vault_file, b"ciphertext").expect("write vault file");

    // WHEN: The client associates the file
    let (accepted, status) = client
        .associate_file(key_id, &vault_file, true)
        .await
        .expect("associate");

    // THEN: The key is registered but unknown
    assert!(accepted);
    assert_eq!(status, KeyStatus::Unknown);

    // WHEN: The client requests the key before it is loaded
    let (status, served) = client
        .request_key(key_id, Some(&vault_file), |key| key.is_some())
        .await
        .expect("request");

    // THEN: Nothing is served and the host is asked to load it
    assert_eq!(status, KeyStatus::Unknown);
    assert!(!served);
    assert!(server.host.events().contains(&HostEvent::LoadRequest(
        key_id,
        KeyStatus::Unknown,
        Some(vault_file.clone())
    )));

    // WHEN: The host attaches a seed and resolves it with the passphrase
    let seed: Arc<dyn KeySeed> = Arc::new(PassphraseSeed {
        passphrase: "open sesame",
        key: b"0123456789abcdef",
    });
    assert_eq!(server.facade.attach_seed(key_id, Some(seed)), KeyStatus::Seeded);
    assert!(!server.facade.try_resolve_key(key_id, &RedactedSecret::from("wrong")));
    assert!(server.facade.try_resolve_key(key_id, &RedactedSecret::from("open sesame")));

    // THEN: The client receives the key
    let (status, key) = client
        .request_key(key_id, None, |key| key.map(<[u8]>::to_vec))
        .await
        .expect("request");
    assert_eq!(status, KeyStatus::Published);
    assert_eq!(key.as_deref(), Some(&b"0123456789abcdef"[..]));

    // WHEN: The operator hides the key
    assert_eq!(server.facade.set_key_hidden(key_id, true), Some(KeyStatus::Hidden));

    // THEN: It is no longer served but still reported as loaded
    let (status, served) = client
        .request_key(key_id, None, |key| key.is_some())
        .await
        .expect("request");
    assert_eq!(status, KeyStatus::Hidden);
    assert!(!served);
    assert_eq!(client.query_status(key_id).await.expect("status"), KeyStatus::Hidden);

    // THEN: Every status change reached the host
    let changes: Vec<KeyStatus> = server
        .host
        .events()
        .into_iter()
        .filter_map(|event| match event {
            HostEvent::KeyStatus(id, status) if id == key_id => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![KeyStatus::Seeded, KeyStatus::Published, KeyStatus::Hidden]
    );

    assert!(server.stop().await);
}

#[tokio::test]
async fn given_registered_keys_when_listed_over_socket_then_metadata_matches_facade() {
    // GIVEN: A running server with two registered keys
    let server = TestServer::started().await;
    let client = server.client();
    let vault_file = server.dir.path().join("a.vault");
    write(&vault_file, b"a").expect("write vault file");
    let first = KeyId::new_random();
    let second = KeyId::new_random();
    client
        .associate_file(first, &vault_file, false)
        .await
        .expect("associate first");
    server.facade.attach_seed(second, None);

    // WHEN: Listing keys over the socket
    let listed = client.list_keys().await.expect("list");

    // THEN: The client sees the same keys as the facade
    let local = server.facade.key_infos();
    assert_eq!(listed.len(), 2);
    let listed_ids: Vec<KeyId> = listed.iter().map(|info| info.key_id).collect();
    let local_ids: Vec<KeyId> = local.iter().map(|info| info.key_id).collect();
    assert_eq!(listed_ids, local_ids);
    let first_info = listed
        .iter()
        .find(|info| info.key_id == first)
        .expect("first listed");
    assert_eq!(first_info.associated_files, 1);
    assert!(first_info.last_associated.is_some());

    assert!(server.stop().await);
}

#[tokio::test]
async fn given_never_registered_key_when_status_queried_over_socket_then_unknown() {
    let server = TestServer::started().await;

    let status = server
        .client()
        .query_status(KeyId::new_random())
        .await
        .expect("status");

    assert_eq!(status, KeyStatus::Unknown);
    assert!(server.facade.key_infos().is_empty());
    assert!(server.stop().await);
}

#[tokio::test]
async fn given_published_key_when_removed_then_unknown_and_wiped_from_key_chain() {
    // GIVEN: A published key
    let server = TestServer::started().await;
    let key_id = KeyId::new_random();
    let seed: Arc<dyn KeySeed> = Arc::new(PassphraseSeed {
        passphrase: "pw",
        key: b"bytes",
    });
    server.facade.attach_seed(key_id, Some(seed));
    assert!(server.facade.try_resolve_key(key_id, &RedactedSecret::from("pw")));

    // WHEN: The operator removes it
    let removed = server.facade.remove_key(key_id);

    // THEN: It is gone from the registry and the key chain
    assert!(removed);
    assert!(server.key_chain.is_empty());
    assert_eq!(
        server.client().query_status(key_id).await.expect("status"),
        KeyStatus::Unknown
    );
    assert!(server.stop().await);
}
