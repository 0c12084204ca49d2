//! Messages exchanged with connected editors
//!
//! Newline-delimited JSON. Each message is a single line of JSON followed by `\n`.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Protocol version announced in the handshake acknowledgement
pub const PROTOCOL_VERSION: u32 = 1;

/// A typed request and the response kind it expects
pub trait Request: Serialize {
    const NAME: &'static str;
    type Response: Response;
}

pub trait Response: DeserializeOwned + Debug {
    const NAME: &'static str;
}

/// Ask the editor to open a file, optionally at a 1-based line and column
///
/// Unset fields are left out of the JSON entirely so "open the file" and
/// "open the file at line 1" stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenFileRequest {
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl OpenFileRequest {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }
}

impl Request for OpenFileRequest {
    const NAME: &'static str = "OpenFile";
    type Response = OpenFileResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileResponse {}

impl Response for OpenFileResponse {
    const NAME: &'static str = "OpenFile";
}

/// An untyped request ready to be written to peers
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub name: String,
    /// Response kind the sender expects back
    pub expected_response: String,
    pub body: Value,
}

impl RequestEnvelope {
    pub fn new<R: Request>(request: &R) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            name: R::NAME.to_string(),
            expected_response: <R::Response as Response>::NAME.to_string(),
            body: serde_json::to_value(request)?,
        })
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Request {
            id: self.id,
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

/// Outcome reported by a peer for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    RequestNotSupported,
    InvalidRequestBody,
}

/// Messages from a peer to the endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// First message on every connection
    Handshake { identity: String },

    Response {
        id: Uuid,
        name: String,
        status: ResponseStatus,
        #[serde(default)]
        body: Value,
    },
}

/// Messages from the endpoint to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    HandshakeAck { server: String, version: u32 },

    Request { id: Uuid, name: String, body: Value },

    Error { message: String },
}
