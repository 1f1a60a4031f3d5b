//! Coordinator wire protocol: events and JSON framing
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pairing operation names the requester (`from`) and the target (`to`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from: Identity,
    pub to: Identity,
}

impl Route {
    pub fn new(from: Identity, to: Identity) -> Self {
        Self { from, to }
    }
}

/// Chat message as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: Identity,
    pub to: Identity,
    /// Opaque to the coordinator, forwarded verbatim
    #[serde(alias = "message")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

/// Metadata for a file held by external blob storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub file_url: String,
}

/// File-transfer notice as sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNotice {
    pub from: Identity,
    pub to: Identity,
    #[serde(flatten)]
    pub file: FileMetadata,
}

/// Client → coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Register(Identity),
    SendConnectionRequest(Route),
    AcceptConnection(Route),
    RejectConnection(Route),
    EndPairing(Route),
    ChatMessage(ChatMessage),
    FileUploadNotice(FileNotice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromPeer {
    pub from: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToPeer {
    pub to: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedChat {
    pub from: Identity,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedFile {
    pub from: Identity,
    #[serde(flatten)]
    pub file: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEnded {
    pub with: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDisconnected {
    pub identity: Identity,
}

/// Coordinator → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectionRequest(FromPeer),
    ConnectionAccepted(ToPeer),
    ConnectionRejected(ToPeer),
    ChatMessage(RelayedChat),
    FileReceived(RelayedFile),
    PairingEnded(PairingEnded),
    PeerDisconnected(PeerDisconnected),
    RequestError(String),
    MessageError(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ProtocolError {
    /// Code sent to the client in a `request-error`
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::MalformedEvent(_) => "MalformedEvent",
            ProtocolError::SerializationError(_) => "SerializationError",
        }
    }
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
    }

    /// Decode a frame delivered as raw bytes; they must hold UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::SendConnectionRequest(_) => "send-connection-request",
            ClientEvent::AcceptConnection(_) => "accept-connection",
            ClientEvent::RejectConnection(_) => "reject-connection",
            ClientEvent::EndPairing(_) => "end-pairing",
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::FileUploadNotice(_) => "file-upload-notice",
        }
    }
}

impl ServerEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn connection_request(from: Identity) -> Self {
        ServerEvent::ConnectionRequest(FromPeer { from })
    }

    pub fn connection_accepted(to: Identity) -> Self {
        ServerEvent::ConnectionAccepted(ToPeer { to })
    }

    pub fn connection_rejected(to: Identity) -> Self {
        ServerEvent::ConnectionRejected(ToPeer { to })
    }

    pub fn pairing_ended(with: Identity) -> Self {
        ServerEvent::PairingEnded(PairingEnded { with })
    }

    pub fn peer_disconnected(identity: Identity) -> Self {
        ServerEvent::PeerDisconnected(PeerDisconnected { identity })
    }

    pub fn request_error(code: impl Into<String>) -> Self {
        ServerEvent::RequestError(code.into())
    }

    pub fn message_error(code: impl Into<String>) -> Self {
        ServerEvent::MessageError(code.into())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionRequest(_) => "connection-request",
            ServerEvent::ConnectionAccepted(_) => "connection-accepted",
            ServerEvent::ConnectionRejected(_) => "connection-rejected",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::FileReceived(_) => "file-received",
            ServerEvent::PairingEnded(_) => "pairing-ended",
            ServerEvent::PeerDisconnected(_) => "peer-disconnected",
            ServerEvent::RequestError(_) => "request-error",
            ServerEvent::MessageError(_) => "message-error",
        }
    }
}

impl From<ChatMessage> for RelayedChat {
    fn from(message: ChatMessage) -> Self {
        Self {
            from: message.from,
            payload: message.payload,
            encrypted: message.encrypted,
        }
    }
}

impl From<FileNotice> for RelayedFile {
    fn from(notice: FileNotice) -> Self {
        Self {
            from: notice.from,
            file: notice.file,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
