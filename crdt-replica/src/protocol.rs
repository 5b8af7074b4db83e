//! Binary protocol between replicas and the authoritative remote store.
//!
//! Every WebSocket binary message carries one bincode-encoded [`Frame`]:
//!
//! ```text
//! Frame::Request      replica ──► remote   { request_id, body }
//! Frame::Response     remote  ──► replica  { request_id, body }
//! Frame::Notification remote  ──► subscriber { kind, object_id, origin, payload }
//! ```
//!
//! Requests on one connection may be pipelined; responses are matched by
//! `request_id`. Notifications are only sent on connections that issued a
//! `Subscribe` request.

use serde::{Deserialize, Serialize};

/// Whether a notification describes a new document or a change to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NotificationKind {
    /// Document created; payload is the full snapshot
    Insert = 1,
    /// Document changed; payload is a change or a snapshot depending on granularity
    Update = 2,
}

/// Change notification published after each committed remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub object_id: String,
    /// Origin tag of the writer
    pub origin: String,
    pub payload: Vec<u8>,
}

/// Remote store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Point read
    Get { id: String },
    /// Merge-or-insert a change, tagged with the writer's origin
    Upsert {
        id: String,
        change: Vec<u8>,
        origin: String,
    },
    /// All documents whose id starts with `prefix`
    GetByPrefix { prefix: String },
    /// Documents for the given ids (missing ids are omitted)
    GetMany { ids: Vec<String> },
    /// Every document (bootstrap)
    GetAll,
    /// Turn this connection into a notification feed
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Document(Vec<u8>),
    Documents(Vec<(String, Vec<u8>)>),
    Ack,
    NotFound,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub body: ResponseBody,
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Frame {
    pub fn request(request_id: u64, body: RequestBody) -> Self {
        Frame::Request(Request { request_id, body })
    }

    pub fn response(request_id: u64, body: ResponseBody) -> Self {
        Frame::Response(Response { request_id, body })
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
