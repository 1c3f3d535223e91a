// Unit tests for the key state registry

use crate::keys::{KeyChain, KeyId, KeyStateStore, KeyStatus, MemoryKeyChain};
use crate::tests::keys::PassphraseSeed;

use common::RedactedSecret;

use std::fs::write;
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

fn new_store() -> KeyStateStore {
    KeyStateStore::with_key_chain(Arc::new(MemoryKeyChain::new()))
}

#[test]
fn given_never_registered_key_when_find_then_absent() {
    // GIVEN: An empty store
    let store = new_store();
    let key_id = KeyId::new_random();

    // WHEN: Looking up an id nobody registered
    let found = store.find(&key_id);

    // THEN: Nothing is found and nothing is created
    assert!(found.is_none());
    assert!(!store.has(&key_id));
    assert!(!store.any());
}

/// **VALUE**: Verifies that `get_or_create` hands out the same state for the
/// same id.
///
/// **WHY THIS MATTERS**: Handlers and the operator API both look keys up.
/// Two states for one id would split seeds, timestamps and visibility.
///
/// **BUG THIS CATCHES**: Would catch `get_or_create` inserting unconditionally.
#[test]
fn given_registered_key_when_get_or_create_called_again_then_same_state() {
    // GIVEN: A store with one registered key
    let store = new_store();
    let key_id = KeyId::new_random();
    let first = store.get_or_create(key_id);

    // WHEN: Registering the same id again
    let second = store.get_or_create(key_id);

    // THEN: Both handles share one state
    assert!(first.same_state(&second));
    assert_eq!(store.len(), 1);
}

#[test]
fn given_registered_key_when_removed_then_find_returns_none() {
    // GIVEN: A store with one registered key
    let store = new_store();
    let key_id = KeyId::new_random();
    store.get_or_create(key_id);

    // WHEN: Removing it
    let removed = store.remove(&key_id);

    // THEN: It is gone
    assert!(removed.is_some());
    assert!(store.find(&key_id).is_none());
    assert!(store.is_empty());
}

#[test]
fn given_several_keys_when_infos_then_snapshot_sorted_by_id() {
    // GIVEN: A store with several keys
    let store = new_store();
    for _ in 0..5 {
        store.get_or_create(KeyId::new_random());
    }

    // WHEN: Taking a snapshot
    let infos = store.infos();

    // THEN: Every key appears once, in id order
    assert_eq!(infos.len(), 5);
    assert!(infos.windows(2).all(|pair| pair[0].key_id < pair[1].key_id));
}

/// **VALUE**: Hammers the store and key states from many threads, each
/// working on its own key id.
///
/// **WHY THIS MATTERS**: The control loop, the facade and policy sweeps touch
/// the store concurrently. Per-key work must stay independent and every
/// operation must remain linearizable per key.
///
/// **BUG THIS CATCHES**: Would catch lost registrations, lost association
/// inserts, a deadlock between the store lock and key locks, or timestamps
/// that go missing under contention.
#[test]
fn given_disjoint_key_ids_when_used_from_many_threads_then_each_state_is_consistent() {
    // GIVEN: A shared store and one key id per thread
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let key_chain = Arc::new(MemoryKeyChain::new());
    let store = KeyStateStore::with_key_chain(Arc::clone(&key_chain) as Arc<dyn KeyChain>);
    let dir = tempdir().expect("temp dir");
    let key_ids: Vec<KeyId> = (0..THREADS).map(|_| KeyId::new_random()).collect();

    // WHEN: Every thread registers, associates a new file, seeds, resolves, toggles and uses its key
    thread::scope(|scope| {
        for (index, key_id) in key_ids.iter().copied().enumerate() {
            let store = store.clone();
            let dir = dir.path();

            scope.spawn(move || {
                let passphrase = format!("pass-{index}");
                let secret = RedactedSecret::from(passphrase.as_str());

                for round in 0..ROUNDS {
                    let file = dir.join(format!("vault-{index}-{round}"));
                    write(&file, b"data").expect("write vault file");

                    let state = store.get_or_create(key_id);
                    assert!(state.associate_file(&file, false));

                    if round == 0 {
                        state.attach_seed(Some(Arc::new(PassphraseSeed::new(
                            &passphrase,
                            key_id.as_bytes(),
                        ))));
                        assert!(state.try_resolve(&secret));
                    }

                    state.set_hidden(round % 2 == 1);
                    let served = state.use_key(|key| {
                        if let Some(key) = key {
                            assert_eq!(key, key_id.as_bytes(), "Key bytes must belong to this id");
                        }
                        key.is_some()
                    });
                    assert_eq!(served, round % 2 == 0);
                }
            });
        }
    });

    // THEN: Exactly one consistent state exists per key id
    assert_eq!(store.len(), THREADS);
    for key_id in &key_ids {
        let state = store.find(key_id).expect("registered");
        let info = state.info();
        assert_eq!(info.status, KeyStatus::Hidden, "Last round hides the key");
        assert_eq!(info.associated_files, ROUNDS, "Every association must be kept");
        assert!(info.has_seed);
        assert!(info.last_requested.is_some());
        assert!(info.last_served.is_some());
    }
}
