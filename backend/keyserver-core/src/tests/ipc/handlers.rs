// Unit tests for the built-in request handlers, driven through the dispatch table

use crate::framing::MessageFrame;
use crate::framing::message_code::{ASSOCIATE_FILE, ERROR, LIST_KEYS, QUERY_KEY_STATUS, REQUEST_KEY};
use crate::framing::messages::{
    AssociateFileRequest, AssociateFileResponse, ErrorResponse, KeyIdRequest, KeyListResponse,
    KeyRequest, KeyResponse, KeyStatusResponse,
};
use crate::ipc::{DispatchTable, HandlerContext};
use crate::keys::{KeyChain, KeyId, KeyStateStore, KeyStatus, MemoryKeyChain};
use crate::tests::ipc::{HostEvent, RecordingHost};

use std::fs::write;
use std::path::PathBuf;
use std::sync::Arc;

use prost::Message as ProstMessage;
use tempfile::tempdir;
use zeroize::Zeroizing;

struct Fixture {
    key_chain: Arc<MemoryKeyChain>,
    store: KeyStateStore,
    host: RecordingHost,
    table: DispatchTable,
}

impl Fixture {
    fn new() -> Self {
        let key_chain = Arc::new(MemoryKeyChain::new());
        Self {
            store: KeyStateStore::with_key_chain(Arc::clone(&key_chain) as Arc<dyn KeyChain>),
            key_chain,
            host: RecordingHost::default(),
            table: DispatchTable::with_defaults(),
        }
    }

    fn call<M: ProstMessage + Default>(&self, code: u32, request: &impl ProstMessage) -> M {
        let response = self.raw_call(code, request);
        assert_eq!(response.code(), code, "Unexpected response code");
        response.decode_payload().expect("decode response")
    }

    fn raw_call(&self, code: u32, request: &impl ProstMessage) -> MessageFrame {
        let mut frame = MessageFrame::inbound();
        frame.set_message(code, request).expect("encode request");

        let context = HandlerContext {
            store: &self.store,
            host: &self.host,
        };
        let mut response = MessageFrame::outbound();
        self.table.dispatch(&context, &frame, &mut response);
        response
    }

    fn publish(&self, key_id: KeyId, key: &[u8]) {
        self.store.get_or_create(key_id);
        self.key_chain.insert(key_id, Zeroizing::new(key.to_vec()));
    }
}

/// **VALUE**: Verifies that a status query never registers a key.
///
/// **WHY THIS MATTERS**: Any local process can query. Registering on lookup
/// would let clients grow the registry without bound.
#[test]
fn given_never_registered_key_when_status_queried_then_unknown_and_not_created() {
    // GIVEN: An empty registry
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();

    // WHEN: Querying a key's status
    let response: KeyStatusResponse = fixture.call(
        QUERY_KEY_STATUS,
        &KeyIdRequest {
            key_id: key_id.to_wire(),
        },
    );

    // THEN: It reports Unknown and the registry stays empty
    assert_eq!(response.key_id, key_id.to_wire());
    assert_eq!(response.status, KeyStatus::Unknown.as_wire());
    assert!(!fixture.store.any());
}

#[test]
fn given_existing_file_when_associated_then_key_registered() {
    // GIVEN: An empty registry and a vault file
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("data.vault");
    write(&file, b"vault").expect("write vault file");

    // WHEN: Associating the file
    let response: AssociateFileResponse = fixture.call(
        ASSOCIATE_FILE,
        &AssociateFileRequest {
            key_id: key_id.to_wire(),
            path: file.to_string_lossy().into_owned(),
            try_load_seed: true,
        },
    );

    // THEN: The key is registered with one association
    assert!(response.accepted);
    assert_eq!(response.status, KeyStatus::Unknown.as_wire());
    let state = fixture.store.find(&key_id).expect("registered on associate");
    assert_eq!(state.association_count(), 1);
}

#[test]
fn given_relative_path_when_associated_then_not_accepted() {
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();

    let response: AssociateFileResponse = fixture.call(
        ASSOCIATE_FILE,
        &AssociateFileRequest {
            key_id: key_id.to_wire(),
            path: String::from("relative.vault"),
            try_load_seed: false,
        },
    );

    assert!(!response.accepted);
}

/// **VALUE**: Verifies that a request for a missing key asks the host to
/// load it, passing along the file that referenced it.
///
/// **BUG THIS CATCHES**: Would catch the load request being dropped, or the
/// context file being lost on the way to the host.
#[test]
fn given_unloaded_key_when_requested_then_absent_and_host_asked_to_load() {
    // GIVEN: A registered key that is not loaded
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();
    fixture.store.get_or_create(key_id);

    // WHEN: A client requests it with a context file
    let response: KeyResponse = fixture.call(
        REQUEST_KEY,
        &KeyRequest {
            key_id: key_id.to_wire(),
            context_file: Some(String::from("/vaults/notes.vault")),
        },
    );

    // THEN: No key is returned and the host got a load request
    assert!(!response.present);
    assert!(response.key.is_empty());
    assert_eq!(
        fixture.host.events(),
        vec![HostEvent::LoadRequest(
            key_id,
            KeyStatus::Unknown,
            Some(PathBuf::from("/vaults/notes.vault"))
        )]
    );
}

#[test]
fn given_published_key_when_requested_then_key_bytes_returned() {
    // GIVEN: A loaded key
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();
    fixture.publish(key_id, b"raw-key");

    // WHEN: Requesting it
    let response: KeyResponse = fixture.call(
        REQUEST_KEY,
        &KeyRequest {
            key_id: key_id.to_wire(),
            context_file: None,
        },
    );

    // THEN: The bytes are served and nobody is asked to load anything
    assert!(response.present);
    assert_eq!(response.key, b"raw-key");
    assert_eq!(response.status, KeyStatus::Published.as_wire());
    assert!(fixture.host.events().is_empty());
}

#[test]
fn given_hidden_key_when_requested_then_absent_without_load_request() {
    // GIVEN: A loaded key the operator hid
    let fixture = Fixture::new();
    let key_id = KeyId::new_random();
    fixture.publish(key_id, b"raw-key");
    fixture.store.find(&key_id).expect("registered").set_hidden(true);

    // WHEN: Requesting it
    let response: KeyResponse = fixture.call(
        REQUEST_KEY,
        &KeyRequest {
            key_id: key_id.to_wire(),
            context_file: None,
        },
    );

    // THEN: It is withheld and reported Hidden
    assert!(!response.present);
    assert_eq!(response.status, KeyStatus::Hidden.as_wire());
    assert!(fixture.host.events().is_empty());
}

#[test]
fn given_registered_keys_when_listed_then_metadata_only() {
    // GIVEN: One loaded and one unloaded key
    let fixture = Fixture::new();
    let loaded = KeyId::new_random();
    let unloaded = KeyId::new_random();
    fixture.publish(loaded, b"raw-key");
    fixture.store.get_or_create(unloaded);

    // WHEN: Listing keys
    let response: KeyListResponse = fixture.call(LIST_KEYS, &KeyListResponse::default());

    // THEN: Both appear with their statuses and no key bytes
    assert_eq!(response.keys.len(), 2);
    let loaded_info = response
        .keys
        .iter()
        .find(|info| info.key_id == loaded.to_wire())
        .expect("loaded key listed");
    assert_eq!(loaded_info.status, KeyStatus::Published.as_wire());

    let mut encoded = Vec::new();
    response.encode(&mut encoded).expect("encode list");
    assert!(
        !encoded.windows(7).any(|window| window == b"raw-key"),
        "Key bytes must never appear in a key list"
    );
}

#[test]
fn given_malformed_key_id_when_requested_then_invalid_request_error() {
    // GIVEN: A request with a 3-byte key id
    let fixture = Fixture::new();

    // WHEN: Dispatching it
    let response = fixture.raw_call(
        REQUEST_KEY,
        &KeyRequest {
            key_id: vec![1, 2, 3],
            context_file: None,
        },
    );

    // THEN: The client gets an invalid request error
    assert_eq!(response.code(), ERROR);
    let error: ErrorResponse = response.decode_payload().expect("error payload");
    assert_eq!(error.kind, "invalid_request");
}
