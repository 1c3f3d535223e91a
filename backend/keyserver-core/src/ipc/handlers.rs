//! Built-in request handlers.
//!
//! Only [`associate_file`] creates key states; every other handler is a
//! read-only lookup that reports never-registered keys as
//! [`KeyStatus::Unknown`].

use crate::error::server::KeyServerError;
use crate::framing::MessageFrame;
use crate::framing::message_code::{
    ASSOCIATE_FILE, KEEP_ALIVE, LIST_KEYS, QUERY_KEY_STATUS, REQUEST_KEY,
};
use crate::framing::messages::{
    AssociateFileRequest, AssociateFileResponse, KeyIdRequest, KeyInfo, KeyListResponse,
    KeyRequest, KeyResponse, KeyStatusResponse,
};
use crate::ipc::HandlerContext;
use crate::keys::{KeyId, KeyStateInfo, KeyStatus};

use common::ErrorLocation;

use std::panic::Location;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use prost::Message as ProstMessage;

pub(crate) fn keep_alive(
    _context: &HandlerContext<'_>,
    _request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    response.set_no_content(KEEP_ALIVE);
    Ok(())
}

pub(crate) fn query_key_status(
    context: &HandlerContext<'_>,
    request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    let query: KeyIdRequest = decode_request(request)?;
    let key_id = parse_key_id(&query.key_id)?;

    let status = context
        .store
        .find(&key_id)
        .map_or(KeyStatus::Unknown, |state| state.status());

    debug!("Status of key {key_id}: {status}");

    response.set_message(
        QUERY_KEY_STATUS,
        &KeyStatusResponse {
            key_id: key_id.to_wire(),
            status: status.as_wire(),
        },
    )?;
    Ok(())
}

pub(crate) fn associate_file(
    context: &HandlerContext<'_>,
    request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    let association: AssociateFileRequest = decode_request(request)?;
    let key_id = parse_key_id(&association.key_id)?;

    if association.path.is_empty() {
        return Err(KeyServerError::InvalidRequest {
            message: String::from("Association path is empty"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let existed = context.store.has(&key_id);
    let state = context.store.get_or_create(key_id);
    let before = if existed {
        state.status()
    } else {
        KeyStatus::Unknown
    };

    let path = Path::new(&association.path);
    let accepted = state.associate_file(path, association.try_load_seed);
    let after = state.status();

    if accepted {
        info!("Associated {} with key {key_id}", path.display());
    } else {
        debug!("Rejected association of {} with key {key_id}", path.display());
    }

    if before != after {
        context.host.on_key_status_changed(key_id, after);
    }

    response.set_message(
        ASSOCIATE_FILE,
        &AssociateFileResponse {
            accepted,
            status: after.as_wire(),
        },
    )?;
    Ok(())
}

pub(crate) fn request_key(
    context: &HandlerContext<'_>,
    request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    let key_request: KeyRequest = decode_request(request)?;
    let key_id = parse_key_id(&key_request.key_id)?;
    let context_file = key_request.context_file.as_deref().map(Path::new);

    let Some(state) = context.store.find(&key_id) else {
        debug!("Key {key_id} requested but never registered");
        context
            .host
            .on_key_load_request(key_id, KeyStatus::Unknown, context_file);
        response.set_message(REQUEST_KEY, &absent_key(KeyStatus::Unknown))?;
        return Ok(());
    };

    let encoded = state.use_key(|key| {
        let reply = match key {
            Some(bytes) => KeyResponse {
                status: KeyStatus::Published.as_wire(),
                present: true,
                key: bytes.to_vec(),
            },
            None => absent_key(state.status()),
        };
        response.set_message(REQUEST_KEY, &reply).map(|()| reply.present)
    });

    if encoded? {
        debug!("Served key {key_id}");
    } else {
        let status = state.status();
        // Hidden keys are loaded; the operator chose not to serve them.
        if status != KeyStatus::Hidden {
            context
                .host
                .on_key_load_request(key_id, status, context_file);
        }
        debug!("Key {key_id} not served ({status})");
    }

    Ok(())
}

pub(crate) fn list_keys(
    context: &HandlerContext<'_>,
    _request: &MessageFrame,
    response: &mut MessageFrame,
) -> Result<(), KeyServerError> {
    let keys: Vec<KeyInfo> = context.store.infos().iter().map(to_wire_info).collect();
    debug!("Listing {} keys", keys.len());
    response.set_message(LIST_KEYS, &KeyListResponse { keys })?;
    Ok(())
}

fn absent_key(status: KeyStatus) -> KeyResponse {
    KeyResponse {
        status: status.as_wire(),
        present: false,
        key: Vec::new(),
    }
}

pub(crate) fn to_wire_info(info: &KeyStateInfo) -> KeyInfo {
    KeyInfo {
        key_id: info.key_id.to_wire(),
        status: info.status.as_wire(),
        hidden: info.hidden,
        has_seed: info.has_seed,
        associated_files: u32::try_from(info.associated_files).unwrap_or(u32::MAX),
        last_registered_ms: epoch_millis(info.last_registered),
        last_requested_ms: info.last_requested.map(epoch_millis),
        last_served_ms: info.last_served.map(epoch_millis),
        last_associated_ms: info.last_associated.map(epoch_millis),
    }
}

/// Milliseconds since the Unix epoch; times before the epoch clamp to zero.
pub(crate) fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[track_caller]
fn decode_request<M: ProstMessage + Default>(request: &MessageFrame) -> Result<M, KeyServerError> {
    request
        .decode_payload()
        .map_err(|e| KeyServerError::InvalidRequest {
            message: format!("Malformed request payload: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}

#[track_caller]
fn parse_key_id(bytes: &[u8]) -> Result<KeyId, KeyServerError> {
    KeyId::from_slice(bytes).ok_or_else(|| KeyServerError::InvalidRequest {
        message: format!("Key id must be 16 bytes, got {}", bytes.len()),
        location: ErrorLocation::from(Location::caller()),
    })
}
