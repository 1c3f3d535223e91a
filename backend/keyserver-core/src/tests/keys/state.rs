// Unit tests for the per-key state machine

use crate::keys::{KeyChain, KeyId, KeySeed, KeyState, KeyStatus, MemoryKeyChain, NoSeedLoader};
use crate::tests::keys::{ColonSeedLoader, OpaqueSeed, PassphraseSeed};

use common::RedactedSecret;

use std::fs::write;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use zeroize::Zeroizing;

fn new_state(key_chain: &Arc<MemoryKeyChain>) -> KeyState {
    KeyState::new(
        KeyId::new_random(),
        Arc::clone(key_chain) as Arc<dyn KeyChain>,
        Arc::new(NoSeedLoader),
    )
}

#[test]
fn given_new_state_when_inspected_then_unknown_with_only_registration_time() {
    // GIVEN: A fresh key state
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);

    // WHEN: Reading its status and timestamps
    let info = state.info();

    // THEN: Nothing but the registration has happened
    assert_eq!(info.status, KeyStatus::Unknown);
    assert!(!info.hidden);
    assert!(!info.has_seed);
    assert_eq!(info.last_requested, None);
    assert_eq!(info.last_served, None);
    assert_eq!(info.last_associated, None);
}

#[test]
fn given_seed_when_attached_and_detached_then_status_follows() {
    // GIVEN: A fresh key state
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);

    // WHEN: Attaching and then detaching a seed
    let seeded = state.attach_seed(Some(Arc::new(OpaqueSeed)));
    let detached = state.attach_seed(None);

    // THEN: Status moves to Seeded and back
    assert_eq!(seeded, KeyStatus::Seeded);
    assert_eq!(detached, KeyStatus::Unknown);
}

/// **VALUE**: Verifies that resolving with the right passphrase publishes
/// the key and that resolving again is a no-op.
///
/// **WHY THIS MATTERS**: Hosts retry resolution freely (e.g. on every load
/// request). A second attempt must not re-run the seed's recovery, which may
/// be expensive or prompt the user.
///
/// **BUG THIS CATCHES**: Would catch `try_resolve` consulting the seed even
/// though the key chain already holds the key.
#[test]
fn given_resolved_key_when_try_resolve_called_again_then_true_without_consulting_seed() {
    // GIVEN: A state with a passphrase seed
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    let seed = Arc::new(PassphraseSeed::new("open sesame", b"key-bytes"));
    state.attach_seed(Some(Arc::clone(&seed) as Arc<dyn KeySeed>));
    let secret = RedactedSecret::from("open sesame");

    // WHEN: Resolving twice
    let first = state.try_resolve(&secret);
    let second = state.try_resolve(&secret);

    // THEN: Both succeed, the seed ran once and the key is published
    assert!(first);
    assert!(second);
    assert_eq!(seed.attempts(), 1, "Seed should only be consulted once");
    assert_eq!(state.status(), KeyStatus::Published);
    assert!(key_chain.contains(&state.key_id()));
}

#[test]
fn given_wrong_passphrase_when_try_resolve_then_false_and_still_seeded() {
    // GIVEN: A state with a passphrase seed
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    state.attach_seed(Some(Arc::new(PassphraseSeed::new("right", b"key"))));

    // WHEN: Resolving with the wrong passphrase
    let resolved = state.try_resolve(&RedactedSecret::from("wrong"));

    // THEN: Nothing is loaded
    assert!(!resolved);
    assert_eq!(state.status(), KeyStatus::Seeded);
    assert!(key_chain.is_empty());
}

/// **VALUE**: Verifies that seeds without passphrase recovery are handled.
///
/// **BUG THIS CATCHES**: Would catch a state machine that assumes every seed
/// supports passphrases.
#[test]
fn given_seed_without_passphrase_capability_when_try_resolve_then_false() {
    // GIVEN: A state whose seed cannot recover from a passphrase
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    state.attach_seed(Some(Arc::new(OpaqueSeed)));

    // WHEN: Resolving
    let resolved = state.try_resolve(&RedactedSecret::from("anything"));

    // THEN: Resolution fails without loading anything
    assert!(!resolved);
    assert_eq!(state.status(), KeyStatus::Seeded);
}

#[test]
fn given_no_seed_when_try_resolve_then_false() {
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);

    assert!(!state.try_resolve(&RedactedSecret::from("anything")));
    assert_eq!(state.status(), KeyStatus::Unknown);
}

/// **VALUE**: Verifies that a hidden key is never lent out.
///
/// **WHY THIS MATTERS**: Hiding is the operator's way of revoking access to
/// a loaded key without unloading it. Serving it anyway defeats the control.
///
/// **BUG THIS CATCHES**: Would catch `use_key` skipping the hidden check, or
/// recording a serve that never happened.
#[test]
fn given_hidden_key_in_chain_when_use_key_then_absent_and_only_request_recorded() {
    // GIVEN: A loaded key that the operator hid
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    key_chain.insert(state.key_id(), Zeroizing::new(b"secret".to_vec()));
    state.set_hidden(true);

    // WHEN: Using the key
    let seen = state.use_key(|key| key.map(<[u8]>::to_vec));

    // THEN: The callback saw no key, the request was recorded, the serve was not
    assert_eq!(seen, None);
    assert_eq!(state.status(), KeyStatus::Hidden);
    assert!(state.last_requested().is_some());
    assert_eq!(state.last_served(), None);
}

#[test]
fn given_published_key_when_use_key_then_callback_borrows_bytes_and_serve_recorded() {
    // GIVEN: A loaded, visible key
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    key_chain.insert(state.key_id(), Zeroizing::new(b"secret".to_vec()));

    // WHEN: Using the key
    let seen = state.use_key(|key| key.map(<[u8]>::to_vec));

    // THEN: The callback saw the bytes and both timestamps are set
    assert_eq!(seen.as_deref(), Some(&b"secret"[..]));
    assert!(state.last_requested().is_some());
    assert!(state.last_served().is_some());
}

#[test]
fn given_absent_key_when_use_key_then_callback_runs_once_with_none() {
    // GIVEN: A key state whose key is not loaded
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    let mut calls = 0;

    // WHEN: Using the key
    state.use_key(|key| {
        calls += 1;
        assert!(key.is_none());
    });

    // THEN: The callback ran exactly once
    assert_eq!(calls, 1);
    assert_eq!(state.last_served(), None);
}

/// **VALUE**: Verifies that relative and missing paths are not associated.
///
/// **BUG THIS CATCHES**: Would catch association bookkeeping being updated
/// before the path is validated.
#[test]
fn given_relative_or_missing_path_when_associate_file_then_rejected_without_changes() {
    // GIVEN: A key state and paths that must be rejected
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = new_state(&key_chain);
    let dir = tempdir().expect("temp dir");
    let missing = dir.path().join("missing.vault");

    // WHEN: Associating them
    let relative = state.associate_file(Path::new("relative/file.vault"), true);
    let absent = state.associate_file(&missing, true);

    // THEN: Both fail and nothing was recorded
    assert!(!relative);
    assert!(!absent);
    assert_eq!(state.association_count(), 0);
    assert_eq!(state.last_associated(), None);
}

#[test]
fn given_existing_file_when_associate_file_then_recorded_and_seed_loaded() {
    // GIVEN: A key state whose loader reads seeds from files
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = KeyState::new(
        KeyId::new_random(),
        Arc::clone(&key_chain) as Arc<dyn KeyChain>,
        Arc::new(ColonSeedLoader),
    );
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("notes.vault");
    write(&file, "pass:key-bytes").expect("write vault file");

    // WHEN: Associating the file with seed loading enabled
    let accepted = state.associate_file(&file, true);

    // THEN: The association is recorded and the key becomes resolvable
    assert!(accepted);
    assert_eq!(state.association_count(), 1);
    assert!(state.last_associated().is_some());
    assert_eq!(state.status(), KeyStatus::Seeded);
    assert!(state.try_resolve(&RedactedSecret::from("pass")));
    assert_eq!(state.status(), KeyStatus::Published);
}

#[test]
fn given_seed_loading_disabled_when_associate_file_then_no_seed_attached() {
    // GIVEN: A key state whose loader would find a seed
    let key_chain = Arc::new(MemoryKeyChain::new());
    let state = KeyState::new(
        KeyId::new_random(),
        Arc::clone(&key_chain) as Arc<dyn KeyChain>,
        Arc::new(ColonSeedLoader),
    );
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("notes.vault");
    write(&file, "pass:key-bytes").expect("write vault file");

    // WHEN: Associating without seed loading
    let accepted = state.associate_file(&file, false);

    // THEN: Only the association is recorded
    assert!(accepted);
    assert!(!state.has_seed());
    assert_eq!(state.status(), KeyStatus::Unknown);
}
