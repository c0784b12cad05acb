//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use courier_protocol::WireMessage;
use courier_transport::{FrameReader, FrameWriter, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const MESSAGES_TOTAL: &str = "courier_messages_total";
    pub const MESSAGES_BYTES: &str = "courier_messages_bytes";
    pub const AUTH_FAILURES_TOTAL: &str = "courier_auth_failures_total";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages relayed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages relayed");
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Connections rejected for a bad or missing credential"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a rejected credential.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Transport half that counts the messages passing through it.
pub struct Metered<T> {
    inner: T,
}

impl<T> Metered<T> {
    /// Wrap a reader or writer.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: FrameReader> FrameReader for Metered<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        let received = self.inner.recv().await;
        match &received {
            Ok(Some(message)) => record_message(message.len(), "inbound"),
            Ok(None) => {}
            Err(TransportError::MessageTooLarge { .. }) => record_error("message_too_large"),
            Err(_) => record_error("transport_read"),
        }
        received
    }
}

#[async_trait]
impl<W: FrameWriter> FrameWriter for Metered<W> {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let bytes = message.len();
        let sent = self.inner.send(message).await;
        match &sent {
            Ok(()) => record_message(bytes, "outbound"),
            Err(_) => record_error("transport_write"),
        }
        sent
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
