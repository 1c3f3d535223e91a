use crate::error::client::ClientError;
use crate::framing::MessageFrame;
use crate::framing::message_code::{
    ASSOCIATE_FILE, ERROR, KEEP_ALIVE, LIST_KEYS, QUERY_KEY_STATUS, REQUEST_KEY, UNRECOGNIZED,
};
use crate::framing::messages::{
    AssociateFileRequest, AssociateFileResponse, ErrorResponse, KeyIdRequest, KeyInfo,
    KeyListResponse, KeyRequest, KeyResponse, KeyStatusResponse,
};
use crate::keys::{KeyId, KeyStateInfo, KeyStatus};
use crate::transport::{ChannelService, StopToken};

use common::ErrorLocation;

use std::panic::Location;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::trace;
use prost::Message as ProstMessage;

/// Typed requests against a key server. Every call uses its own connection.
#[derive(Debug, Clone)]
pub struct KeyServerClient {
    service: ChannelService,
    stop: StopToken,
}

impl KeyServerClient {
    pub fn new(service: ChannelService) -> Self {
        Self::with_stop_token(service, StopToken::new())
    }

    /// Client whose calls are cancelled once `stop` is requested.
    pub fn with_stop_token(service: ChannelService, stop: StopToken) -> Self {
        Self { service, stop }
    }

    pub fn service(&self) -> &ChannelService {
        &self.service
    }

    pub async fn keep_alive(&self) -> Result<(), ClientError> {
        let mut request = MessageFrame::no_content(KEEP_ALIVE);
        let response = self.send_raw(&mut request).await?;
        expect_code(&response, KEEP_ALIVE)
    }

    /// Send one frame and return whatever frame comes back, without
    /// interpreting it.
    pub async fn send_raw(&self, request: &mut MessageFrame) -> Result<MessageFrame, ClientError> {
        let mut endpoint = self.service.connect(&self.stop).await?;
        request.emit(&mut endpoint, &self.stop).await?;

        let mut response = MessageFrame::inbound();
        if !response.try_fill(&mut endpoint, &self.stop).await? {
            return Err(ClientError::UnexpectedResponse {
                message: String::from("Server closed the connection without responding"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        trace!(
            "Received code {} with {} payload bytes",
            response.code(),
            response.payload().len()
        );
        Ok(response)
    }

    pub async fn query_status(&self, key_id: KeyId) -> Result<KeyStatus, ClientError> {
        let response: KeyStatusResponse = self
            .call(
                QUERY_KEY_STATUS,
                &KeyIdRequest {
                    key_id: key_id.to_wire(),
                },
            )
            .await?;
        parse_status(response.status)
    }

    /// Returns whether the association was accepted and the key's status after it.
    pub async fn associate_file(
        &self,
        key_id: KeyId,
        path: &Path,
        try_load_seed: bool,
    ) -> Result<(bool, KeyStatus), ClientError> {
        let response: AssociateFileResponse = self
            .call(
                ASSOCIATE_FILE,
                &AssociateFileRequest {
                    key_id: key_id.to_wire(),
                    path: path.to_string_lossy().into_owned(),
                    try_load_seed,
                },
            )
            .await?;
        Ok((response.accepted, parse_status(response.status)?))
    }

    /// Ask for a key and lend it to `callback`.
    ///
    /// `callback` runs once, with `Some(bytes)` if the server served the key.
    /// The received copy is wiped when `callback` returns.
    pub async fn request_key<R>(
        &self,
        key_id: KeyId,
        context_file: Option<&Path>,
        callback: impl FnOnce(Option<&[u8]>) -> R,
    ) -> Result<(KeyStatus, R), ClientError> {
        let response: KeyResponse = self
            .call(
                REQUEST_KEY,
                &KeyRequest {
                    key_id: key_id.to_wire(),
                    context_file: context_file.map(|path| path.to_string_lossy().into_owned()),
                },
            )
            .await?;

        let status = parse_status(response.status)?;
        let result = if response.present {
            callback(Some(response.key.as_slice()))
        } else {
            callback(None)
        };
        Ok((status, result))
    }

    pub async fn list_keys(&self) -> Result<Vec<KeyStateInfo>, ClientError> {
        let mut request = MessageFrame::no_content(LIST_KEYS);
        let response: KeyListResponse = self.exchange(&mut request, LIST_KEYS).await?;
        response.keys.iter().map(from_wire_info).collect()
    }

    async fn call<M: ProstMessage + Default>(
        &self,
        code: u32,
        request: &impl ProstMessage,
    ) -> Result<M, ClientError> {
        let mut frame = MessageFrame::outbound();
        frame.set_message(code, request)?;
        self.exchange(&mut frame, code).await
    }

    async fn exchange<M: ProstMessage + Default>(
        &self,
        request: &mut MessageFrame,
        code: u32,
    ) -> Result<M, ClientError> {
        let received = self.send_raw(request).await;
        request.clear();
        let mut response = received?;

        expect_code(&response, code)?;
        let decoded = response.decode_payload();
        response.clear();
        Ok(decoded?)
    }
}

#[track_caller]
fn expect_code(response: &MessageFrame, code: u32) -> Result<(), ClientError> {
    match response.code() {
        actual if actual == code => Ok(()),
        ERROR => {
            let failure: ErrorResponse = response.decode_payload()?;
            Err(ClientError::Server {
                kind: failure.kind,
                message: failure.message,
                location: ErrorLocation::from(Location::caller()),
            })
        }
        UNRECOGNIZED => Err(ClientError::UnexpectedResponse {
            message: format!("Server does not recognize code {code}"),
            location: ErrorLocation::from(Location::caller()),
        }),
        other => Err(ClientError::UnexpectedResponse {
            message: format!("Expected code {code}, got {other}"),
            location: ErrorLocation::from(Location::caller()),
        }),
    }
}

#[track_caller]
fn parse_status(value: u32) -> Result<KeyStatus, ClientError> {
    KeyStatus::from_wire(value).ok_or_else(|| ClientError::UnexpectedResponse {
        message: format!("Unknown key status {value}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn from_wire_info(info: &KeyInfo) -> Result<KeyStateInfo, ClientError> {
    let key_id = KeyId::from_slice(&info.key_id).ok_or_else(|| ClientError::UnexpectedResponse {
        message: format!("Key id must be 16 bytes, got {}", info.key_id.len()),
        location: ErrorLocation::from(Location::caller()),
    })?;

    Ok(KeyStateInfo {
        key_id,
        status: parse_status(info.status)?,
        hidden: info.hidden,
        has_seed: info.has_seed,
        associated_files: info.associated_files as usize,
        last_registered: from_epoch_millis(info.last_registered_ms),
        last_requested: info.last_requested_ms.map(from_epoch_millis),
        last_served: info.last_served_ms.map(from_epoch_millis),
        last_associated: info.last_associated_ms.map(from_epoch_millis),
    })
}

fn from_epoch_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
