//! Transport abstraction traits for Courier.
//!
//! A connection is split into a receive half and a send half so the read
//! pump and the write pump of a session can own one each.

use async_trait::async_trait;
use courier_protocol::WireMessage;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The receive half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next data message.
    ///
    /// Control traffic (ping/pong) is handled internally. Returns `None` when
    /// the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;
}

/// The send half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one data message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Send a close frame and shut the connection down.
    ///
    /// Closing an already closed writer is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<R: FrameReader + ?Sized> FrameReader for Box<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        (**self).recv().await
    }
}

#[async_trait]
impl<W: FrameWriter + ?Sized> FrameWriter for Box<W> {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
