// packages/engine/src/messaging/message.rs
//! Message envelopes and payloads
//!
//! Payloads are opaque bytes plus a format tag. The engine only knows how to
//! produce and read `Json` and `Raw` payloads; other tags are carried through
//! untouched for whatever codec the application plugs in.

use crate::runtime::agent::AgentId;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary format a payload was encoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    MessagePack,
    Cbor,
    Bson,
    Ubjson,
    BjData,
    Json,
    Raw,
}

/// Encoded message body. Cloning is cheap (shared buffer), which keeps
/// broadcast fan-out from copying the bytes per receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    bytes: Bytes,
    format: PayloadFormat,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, format: PayloadFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes, PayloadFormat::Raw)
    }

    /// Encode any serializable value as a JSON payload
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| EngineError::PayloadEncode(e.to_string()))?;
        Ok(Self::new(encoded, PayloadFormat::Json))
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        match self.format {
            PayloadFormat::Json => serde_json::from_slice(&self.bytes)
                .map_err(|e| EngineError::PayloadDecode(e.to_string())),
            other => Err(EngineError::UnsupportedFormat(other)),
        }
    }
}

/// Immutable envelope delivered to a mailbox
#[derive(Debug, Clone)]
pub struct Message {
    sender: AgentId,
    receiver: AgentId,
    payload: Payload,
}

impl Message {
    pub fn new(sender: AgentId, receiver: AgentId, payload: Payload) -> Self {
        Self {
            sender,
            receiver,
            payload,
        }
    }

    pub fn sender(&self) -> AgentId {
        self.sender
    }

    pub fn receiver(&self) -> AgentId {
        self.receiver
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn format(&self) -> PayloadFormat {
        self.payload.format
    }

    pub fn bytes(&self) -> &Bytes {
        &self.payload.bytes
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        self.payload.decode_json()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} -> {}]: ", self.sender, self.receiver)?;
        match self.payload.format {
            PayloadFormat::Json | PayloadFormat::Raw => {
                f.write_str(&String::from_utf8_lossy(&self.payload.bytes))
            }
            other => write!(f, "<{} bytes {:?}>", self.payload.len(), other),
        }
    }
}
