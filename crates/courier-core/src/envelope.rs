//! Identities and envelopes.
//!
//! An [`Envelope`] is the unit the hub routes. Its payload is opaque: the
//! relay never inspects it, endpoints may have encrypted it.

use bytes::Bytes;
use courier_protocol::Frame;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// An authenticated identity.
///
/// Immutable once created. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    recipient: Identity,
    sender: Identity,
    payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(
        recipient: impl Into<Identity>,
        sender: impl Into<Identity>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            payload: payload.into(),
        }
    }

    /// Replace the sender, discarding whatever the envelope claimed.
    #[must_use]
    pub fn stamped(self, sender: Identity) -> Self {
        Self { sender, ..self }
    }

    /// The identity this envelope is addressed to.
    #[must_use]
    pub fn recipient(&self) -> &Identity {
        &self.recipient
    }

    /// The identity this envelope comes from.
    #[must_use]
    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    /// The opaque payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Convert to a wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::new(
            self.recipient.as_str(),
            self.sender.as_str(),
            self.payload.to_vec(),
        )
    }
}

/// Keeps the sender the frame claimed. Callers routing client traffic must
/// [`stamp`](Envelope::stamped) the result.
impl From<Frame> for Envelope {
    fn from(frame: Frame) -> Self {
        Self {
            recipient: Identity::from(frame.recipient),
            sender: Identity::from(frame.sender),
            payload: Bytes::from(frame.content),
        }
    }
}
