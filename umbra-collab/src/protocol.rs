//! Binary framing for the session sync protocol.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────────┬──────────┬──────────┐
//! │ msg_type │ connection_id │ seq      │ payload  │
//! │ 1 byte   │ 16 bytes      │ varint   │ variable │
//! └──────────┴───────────────┴──────────┴──────────┘
//! ```
//!
//! Payload encoding depends on `msg_type`:
//! - `Hello` / `Welcome` / `Refused`: bincode
//! - `StateUpdate` / `TokensUpdate` / `GmUpdate` / `TokenCommand`: JSON
//!   documents, shaped like the browser client's events
//! - `MapImage`: raw JPEG bytes
//!
//! Server-originated frames carry `Uuid::nil()` as `connection_id` and a
//! process-wide increasing `seq`.

use serde::{Deserialize, Serialize};
use umbra_core::{PublicSnapshot, StateDelta, Token, TokenCommand};
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client handshake: requested role and optional GM key
    Hello = 1,
    /// Handshake accepted
    Welcome = 2,
    /// Handshake refused; the server closes afterwards
    Refused = 3,
    /// Enter the shared room and receive the current scene
    Join = 4,
    /// Viewer-safe state snapshot
    StateUpdate = 5,
    /// Redacted map image following a `pending` snapshot
    MapImage = 6,
    /// Full token collection
    TokensUpdate = 7,
    /// GM partial state edit
    GmUpdate = 8,
    /// GM token mutation
    TokenCommand = 9,
    /// Heartbeat ping
    Ping = 10,
    /// Heartbeat pong
    Pong = 11,
}

/// Role requested in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Gm,
    Viewer,
}

impl Role {
    pub fn is_gm(&self) -> bool {
        matches!(self, Role::Gm)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Gm => write!(f, "gm"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub role: Role,
    /// Shared secret required for the GM role when the server has one.
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub connection_id: Uuid,
    pub role: Role,
}

/// `{"tokens": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokensPayload {
    pub tokens: Vec<Token>,
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Sender; nil for server-originated frames
    pub connection_id: Uuid,
    /// Server send order (0 for client frames)
    pub seq: u64,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

fn bincode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn json_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

impl SyncMessage {
    fn new(msg_type: MessageType, connection_id: Uuid, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            connection_id,
            seq: 0,
            payload,
        }
    }

    /// Stamp the server send order.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn hello(role: Role, key: Option<String>) -> Result<Self, ProtocolError> {
        let payload = bincode_payload(&Hello { role, key })?;
        Ok(Self::new(MessageType::Hello, Uuid::nil(), payload))
    }

    pub fn welcome(connection_id: Uuid, role: Role) -> Result<Self, ProtocolError> {
        let payload = bincode_payload(&Welcome {
            connection_id,
            role,
        })?;
        Ok(Self::new(MessageType::Welcome, Uuid::nil(), payload))
    }

    pub fn refused(reason: &str) -> Self {
        Self::new(MessageType::Refused, Uuid::nil(), reason.as_bytes().to_vec())
    }

    pub fn join(connection_id: Uuid) -> Self {
        Self::new(MessageType::Join, connection_id, Vec::new())
    }

    pub fn state_update(snapshot: &PublicSnapshot) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::StateUpdate,
            Uuid::nil(),
            json_payload(snapshot)?,
        ))
    }

    pub fn map_image(bytes: Vec<u8>) -> Self {
        Self::new(MessageType::MapImage, Uuid::nil(), bytes)
    }

    pub fn tokens_update(tokens: &[Token]) -> Result<Self, ProtocolError> {
        let payload = json_payload(&TokensPayload {
            tokens: tokens.to_vec(),
        })?;
        Ok(Self::new(MessageType::TokensUpdate, Uuid::nil(), payload))
    }

    pub fn gm_update(connection_id: Uuid, delta: &StateDelta) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::GmUpdate,
            connection_id,
            json_payload(delta)?,
        ))
    }

    /// GM edit from a raw JSON document (the browser client's `update_data`).
    pub fn gm_update_raw(connection_id: Uuid, json: Vec<u8>) -> Self {
        Self::new(MessageType::GmUpdate, connection_id, json)
    }

    pub fn token_command(connection_id: Uuid, command: &TokenCommand) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            MessageType::TokenCommand,
            connection_id,
            json_payload(command)?,
        ))
    }

    pub fn ping(connection_id: Uuid) -> Self {
        Self::new(MessageType::Ping, connection_id, Vec::new())
    }

    pub fn pong(connection_id: Uuid) -> Self {
        Self::new(MessageType::Pong, connection_id, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    fn ensure_type(&self, msg_type: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type != msg_type {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(())
    }

    fn bincode_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let (value, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(value)
    }

    fn json_body<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn hello_payload(&self) -> Result<Hello, ProtocolError> {
        self.ensure_type(MessageType::Hello)?;
        self.bincode_body()
    }

    pub fn welcome_payload(&self) -> Result<Welcome, ProtocolError> {
        self.ensure_type(MessageType::Welcome)?;
        self.bincode_body()
    }

    pub fn refusal_reason(&self) -> Result<String, ProtocolError> {
        self.ensure_type(MessageType::Refused)?;
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }

    pub fn snapshot(&self) -> Result<PublicSnapshot, ProtocolError> {
        self.ensure_type(MessageType::StateUpdate)?;
        self.json_body()
    }

    pub fn tokens(&self) -> Result<Vec<Token>, ProtocolError> {
        self.ensure_type(MessageType::TokensUpdate)?;
        Ok(self.json_body::<TokensPayload>()?.tokens)
    }

    pub fn delta(&self) -> Result<StateDelta, ProtocolError> {
        self.ensure_type(MessageType::GmUpdate)?;
        StateDelta::from_json(&self.payload)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn command(&self) -> Result<TokenCommand, ProtocolError> {
        self.ensure_type(MessageType::TokenCommand)?;
        self.json_body()
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    Refused(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::Refused(reason) => write!(f, "Handshake refused: {reason}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
