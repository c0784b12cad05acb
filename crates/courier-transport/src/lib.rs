//! # courier-transport
//!
//! Transport abstraction layer for the Courier message relay.
//!
//! Session pumps are written against two traits:
//!
//! - [`FrameReader`] - the receive half, owned by the read pump
//! - [`FrameWriter`] - the send half, owned by the write pump
//!
//! Implementations:
//!
//! - **WebSocket** - axum upgrade, the production transport
//! - **Memory** - in-process pair for tests and benchmarks
//!
//! ```rust,ignore
//! use courier_transport::FrameReader;
//!
//! async fn drain(mut reader: impl FrameReader) {
//!     while let Ok(Some(message)) = reader.recv().await {
//!         // Decode and route
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReader, WebSocketWriter};
