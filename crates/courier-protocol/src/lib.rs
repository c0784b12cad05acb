//! # courier-protocol
//!
//! Wire protocol definitions for the Courier message relay.
//!
//! Every message on the wire is one envelope frame:
//! `{ recipient, sender, content }`. The relay treats `content` as opaque
//! bytes and rewrites `sender` with the authenticated identity.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Frame, WireFormat};
//!
//! let frame = Frame::new("bob", "alice", b"Hello, bob!".to_vec());
//!
//! let message = codec::encode(&frame, WireFormat::MessagePack).unwrap();
//! let decoded = codec::decode(&message).unwrap();
//! assert_eq!(decoded, frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{Frame, WireFormat, WireMessage};
