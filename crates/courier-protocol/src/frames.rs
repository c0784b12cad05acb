//! Frame types for the Courier protocol.
//!
//! A frame carries exactly one routed envelope. The relay never looks inside
//! `content`; endpoints are free to encrypt it before sending.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serialization used for frames written to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    /// JSON text messages with base64 content on the way out.
    #[default]
    Json,
    /// Length-prefixed MessagePack in binary messages.
    MessagePack,
}

impl WireFormat {
    /// Name used in the `format` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MessagePack => "msgpack",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "msgpack" | "messagepack" => Ok(WireFormat::MessagePack),
            _ => Err("Unknown wire format"),
        }
    }
}

/// A transport-level message before decoding.
///
/// Text messages always carry JSON, binary messages always carry MessagePack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
}

impl WireMessage {
    /// Size of the message body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    /// Whether the message body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One envelope as it travels on the wire.
///
/// `sender` is optional inbound; the relay overwrites it with the
/// authenticated identity before routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Identity the frame is addressed to.
    pub recipient: String,
    /// Identity the frame claims to come from.
    #[serde(default)]
    pub sender: String,
    /// Opaque payload.
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Create a frame without a sender, as a client would send it.
    #[must_use]
    pub fn to(recipient: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(recipient, String::new(), content)
    }
}
