//! In-process transport.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`MemoryPeer`] that plays the client. Used by tests and benchmarks to
//! drive session pumps without sockets.

use async_trait::async_trait;
use courier_protocol::WireMessage;
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, TransportError};

enum Inbound {
    Message(WireMessage),
    Fail(String),
}

/// What the server side wrote to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A data message.
    Message(WireMessage),
    /// The server sent a close frame.
    Close,
}

/// Create a connected in-memory transport.
#[must_use]
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        MemoryReader {
            inbound: inbound_rx,
        },
        MemoryWriter {
            outbound: outbound_tx,
            closed: false,
        },
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
    )
}

/// Receive half of an in-memory connection.
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Message(message)) => Ok(Some(message)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// Send half of an in-memory connection.
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<PeerEvent>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(PeerEvent::Message(message))
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.outbound.send(PeerEvent::Close);
        Ok(())
    }
}

/// The client end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<PeerEvent>,
}

impl MemoryPeer {
    /// Deliver a message to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the reader was dropped.
    pub fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        self.push(Inbound::Message(message))
    }

    /// Deliver a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the reader was dropped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WireMessage::Text(text.into()))
    }

    /// Make the server side's next receive fail with a transport error.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the reader was dropped.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(Inbound::Fail(reason.into()))
    }

    /// Close the client side; the server's reader sees an orderly close.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next thing the server wrote.
    ///
    /// Returns `None` once the server's writer is dropped.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.outbound.recv().await
    }

    /// Take the next thing the server wrote, if any.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.outbound.try_recv().ok()
    }

    fn push(&self, inbound: Inbound) -> Result<(), TransportError> {
        self.inbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(inbound)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
