//! # courier-core
//!
//! Routing core of the Courier point-to-point message relay.
//!
//! - **Hub** - Single task that owns the identity to session registry
//! - **Session** - One authenticated connection and its two pumps
//! - **Gateway** - Authenticates a connection and hands it to the hub
//! - **Auth** - Credential validation (HS256 tokens)
//! - **Keys** - Public key directory served alongside the relay
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  admit   ┌─────────────┐  register  ┌─────────────┐
//! │  Transport  │─────────▶│   Gateway   │───────────▶│     Hub     │
//! └─────────────┘          └─────────────┘            └─────────────┘
//!        ▲                                             │        ▲
//!        │ write                              deliver  │        │ forward
//!        │                                             ▼        │
//! ┌─────────────┐  mailbox ┌─────────────┐            ┌─────────────┐
//! │ Write pump  │◀─────────│   Session   │            │  Read pump  │
//! └─────────────┘          └─────────────┘            └─────────────┘
//! ```
//!
//! Payloads are opaque. The relay reads only the recipient, and stamps
//! the sender with the identity the session authenticated as.

pub mod auth;
pub mod envelope;
pub mod gateway;
pub mod hub;
pub mod keys;
pub mod session;

pub use auth::{parse_bearer, AuthError, CredentialValidator, HmacTokenValidator};
pub use envelope::{Envelope, Identity};
pub use gateway::{Admission, Gateway, GatewayConfig};
pub use hub::{ForwardOutcome, Hub, HubConfig, HubError, HubHandle, HubStats};
pub use keys::{KeyDirectory, KeyLookupError, MemoryKeyDirectory};
pub use session::{spawn_pumps, Mailbox, Session, SessionId, SessionKey, SessionTasks};
