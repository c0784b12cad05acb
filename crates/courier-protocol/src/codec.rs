//! Codec for encoding and decoding Courier frames.
//!
//! Two encodings share one logical frame:
//!
//! - JSON in text messages. Inbound `content` is a string whose UTF-8 bytes
//!   are the payload; outbound `content` is base64.
//! - MessagePack in binary messages, behind a 4-byte big-endian length prefix.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::{Frame, WireFormat, WireMessage};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

#[derive(Deserialize)]
struct InboundJson {
    recipient: String,
    #[serde(default)]
    sender: Option<String>,
    content: JsonContent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonContent {
    Text(String),
    Octets(Vec<u8>),
}

#[derive(Serialize)]
struct OutboundJson<'a> {
    recipient: &'a str,
    sender: &'a str,
    content: String,
}

fn validate(frame: Frame) -> Result<Frame, ProtocolError> {
    if frame.recipient.is_empty() {
        return Err(ProtocolError::Invalid("missing recipient".into()));
    }
    Ok(frame)
}

/// Encode a frame as a JSON text message body.
///
/// # Errors
///
/// Returns an error if the encoded frame is too large.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(&OutboundJson {
        recipient: &frame.recipient,
        sender: &frame.sender,
        content: STANDARD.encode(&frame.content),
    })?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a frame from a JSON text message body.
///
/// # Errors
///
/// Returns an error if the text is too large, not a frame, or has no recipient.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let inbound: InboundJson = serde_json::from_str(text)?;
    let content = match inbound.content {
        JsonContent::Text(text) => text.into_bytes(),
        JsonContent::Octets(octets) => octets,
    };

    validate(Frame {
        recipient: inbound.recipient,
        sender: inbound.sender.unwrap_or_default(),
        content,
    })
}

/// Encode a frame as length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_msgpack(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode a frame from one length-prefixed MessagePack message.
///
/// The message must contain exactly one frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_msgpack(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }
    if data.len() > total_size {
        return Err(ProtocolError::Invalid(format!(
            "{} trailing bytes after frame",
            data.len() - total_size
        )));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    validate(frame)
}

/// Encode a frame into a transport message of the given format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode(frame: &Frame, format: WireFormat) -> Result<WireMessage, ProtocolError> {
    match format {
        WireFormat::Json => encode_json(frame).map(WireMessage::Text),
        WireFormat::MessagePack => encode_msgpack(frame).map(WireMessage::Binary),
    }
}

/// Decode a frame from a transport message.
///
/// Text is decoded as JSON, binary as MessagePack.
///
/// # Errors
///
/// Returns an error if the message is not a valid frame.
pub fn decode(message: &WireMessage) -> Result<Frame, ProtocolError> {
    match message {
        WireMessage::Text(text) => decode_json(text),
        WireMessage::Binary(data) => decode_msgpack(data),
    }
}

/// Codec bound to one outbound wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    format: WireFormat,
}

impl FrameCodec {
    /// Create a codec that encodes in the given format.
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// The outbound format.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode a frame in this codec's format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<WireMessage, ProtocolError> {
        encode(frame, self.format)
    }

    /// Decode a frame from any transport message.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, message: &WireMessage) -> Result<Frame, ProtocolError> {
        decode(message)
    }
}
