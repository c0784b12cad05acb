//! # courier-server
//!
//! HTTP and WebSocket front end for the Courier relay: configuration,
//! routes, and Prometheus metrics. The binary in `main.rs` wires these
//! together.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
