//! Sessions: one live connection bound to one authenticated identity.
//!
//! A session is opened as two halves:
//!
//! - [`Session`] - owned by the hub registry. Holds the sending side of the
//!   bounded outbound queue.
//! - [`Mailbox`] - owned by the connection. Turned into a [`ReadPump`] and a
//!   [`WritePump`] that run as independent tasks.
//!
//! The halves share only the outbound queue and a liveness signal. Dropping
//! the `Session` closes the queue; [`Session::close`] additionally drops
//! liveness, which is how the hub closes the transport.

use crate::envelope::{Envelope, Identity};
use crate::hub::HubHandle;
use courier_protocol::{codec, FrameCodec, WireFormat};
use courier_transport::{FrameReader, FrameWriter};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long the write pump waits for the close handshake. A stalled peer
/// cannot accept a close frame; past this the transport is dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
///
/// Two sessions for the same identity always have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// Names one exact session: its identity and its id.
///
/// Used to unregister, so a stale unregister cannot evict a newer session
/// for the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    id: SessionId,
    identity: Identity,
}

impl SessionKey {
    /// The session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Shared close signal. `true` while the transport is open.
#[derive(Debug, Clone)]
struct Liveness(Arc<watch::Sender<bool>>);

impl Liveness {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self(Arc::new(tx))
    }

    fn close(&self) {
        self.0.send_replace(false);
    }

    fn is_alive(&self) -> bool {
        *self.0.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

/// Resolves once liveness has dropped.
async fn closed(liveness: &mut watch::Receiver<bool>) {
    while *liveness.borrow_and_update() {
        if liveness.changed().await.is_err() {
            return;
        }
    }
}

/// The hub-side half of a session.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    outbound: mpsc::Sender<Envelope>,
    liveness: Liveness,
}

impl Session {
    /// Open a session for an authenticated identity.
    ///
    /// `capacity` bounds the outbound queue; zero is treated as one.
    #[must_use]
    pub fn open(identity: Identity, capacity: usize) -> (Session, Mailbox) {
        let key = SessionKey {
            id: SessionId::next(),
            identity,
        };
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let liveness = Liveness::new();

        trace!(session = %key.id, identity = %key.identity, capacity, "Session opened");

        (
            Session {
                key: key.clone(),
                outbound: tx,
                liveness: liveness.clone(),
            },
            Mailbox {
                key,
                outbound: rx,
                liveness,
            },
        )
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.key.id
    }

    /// The authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.key.identity
    }

    /// The key naming this exact session.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the transport is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Enqueue without waiting.
    pub(crate) fn try_deliver(&self, envelope: Envelope) -> Result<(), TrySendError<Envelope>> {
        self.outbound.try_send(envelope)
    }

    /// Close the outbound queue and the transport.
    pub(crate) fn close(self) {
        self.liveness.close();
        debug!(session = %self.key.id, identity = %self.key.identity, "Session closed");
    }
}

/// The connection-side half of a session.
#[derive(Debug)]
pub struct Mailbox {
    key: SessionKey,
    outbound: mpsc::Receiver<Envelope>,
    liveness: Liveness,
}

impl Mailbox {
    /// The key naming this session.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.key.identity
    }

    /// Whether the transport is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Take the next queued envelope without waiting.
    ///
    /// # Errors
    ///
    /// `Empty` if nothing is queued, `Disconnected` once the hub closed the
    /// queue and it has been drained.
    pub fn try_recv(&mut self) -> Result<Envelope, TryRecvError> {
        self.outbound.try_recv()
    }

    /// Wait for the next queued envelope; `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.outbound.recv().await
    }

    /// Build the two pumps for this session.
    #[must_use]
    pub fn into_pumps<R, W>(
        self,
        reader: R,
        writer: W,
        hub: HubHandle,
        format: WireFormat,
    ) -> (ReadPump<R>, WritePump<W>) {
        (
            ReadPump {
                key: self.key.clone(),
                reader,
                liveness: self.liveness.clone(),
                hub,
            },
            WritePump {
                key: self.key,
                outbound: self.outbound,
                writer,
                liveness: self.liveness,
                codec: FrameCodec::new(format),
            },
        )
    }
}

/// Moves inbound frames from the transport to the hub.
pub struct ReadPump<R> {
    key: SessionKey,
    reader: R,
    liveness: Liveness,
    hub: HubHandle,
}

impl<R: FrameReader> ReadPump<R> {
    /// Run until the peer closes, the transport fails, or the session is
    /// closed. Always unregisters and closes the transport on exit.
    pub async fn run(mut self) {
        let mut liveness = self.liveness.watch();
        debug!(session = %self.key.id, identity = %self.key.identity, "Read pump started");

        loop {
            let received = tokio::select! {
                biased;

                _ = closed(&mut liveness) => {
                    debug!(session = %self.key.id, "Transport closed");
                    break;
                }

                received = self.reader.recv() => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(session = %self.key.id, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(session = %self.key.id, error = %e, "Transport error");
                    break;
                }
            };

            let frame = match codec::decode(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(session = %self.key.id, error = %e, "Dropping malformed frame");
                    continue;
                }
            };

            // The claimed sender is never trusted.
            let envelope = Envelope::from(frame).stamped(self.key.identity.clone());
            trace!(
                session = %self.key.id,
                recipient = %envelope.recipient(),
                bytes = envelope.payload_size(),
                "Forwarding"
            );

            let forwarded = tokio::select! {
                biased;

                _ = closed(&mut liveness) => {
                    debug!(session = %self.key.id, "Transport closed while forwarding");
                    break;
                }

                forwarded = self.hub.forward(envelope) => forwarded,
            };

            if forwarded.is_err() {
                debug!(session = %self.key.id, "Hub stopped");
                break;
            }
        }

        if self.hub.unregister(self.key.clone()).await.is_err() {
            trace!(session = %self.key.id, "Hub stopped before unregister");
        }
        self.liveness.close();

        debug!(session = %self.key.id, identity = %self.key.identity, "Read pump stopped");
    }
}

/// Moves queued envelopes from the outbound queue to the transport.
pub struct WritePump<W> {
    key: SessionKey,
    outbound: mpsc::Receiver<Envelope>,
    writer: W,
    liveness: Liveness,
    codec: FrameCodec,
}

impl<W: FrameWriter> WritePump<W> {
    /// Run until the queue is closed, the transport is closed, or a write
    /// fails. Always attempts a close frame on exit, bounded by
    /// [`CLOSE_TIMEOUT`].
    pub async fn run(mut self) {
        let mut liveness = self.liveness.watch();
        debug!(
            session = %self.key.id,
            identity = %self.key.identity,
            format = %self.codec.format(),
            "Write pump started"
        );

        loop {
            let envelope = tokio::select! {
                biased;

                _ = closed(&mut liveness) => {
                    debug!(session = %self.key.id, "Transport closed");
                    break;
                }

                envelope = self.outbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => {
                        debug!(session = %self.key.id, "Outbound queue closed");
                        break;
                    }
                },
            };

            let message = match self.codec.encode(&envelope.to_frame()) {
                Ok(message) => message,
                Err(e) => {
                    warn!(session = %self.key.id, error = %e, "Failed to encode envelope");
                    continue;
                }
            };

            let sent = tokio::select! {
                biased;

                _ = closed(&mut liveness) => break,
                sent = self.writer.send(message) => sent,
            };

            if let Err(e) = sent {
                debug!(session = %self.key.id, error = %e, "Write failed");
                break;
            }
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(session = %self.key.id, error = %e, "Close failed"),
            Err(_) => debug!(session = %self.key.id, "Close timed out, dropping transport"),
        }
        self.liveness.close();

        debug!(session = %self.key.id, identity = %self.key.identity, "Write pump stopped");
    }
}

/// Join handles for a session's pump tasks.
#[derive(Debug)]
pub struct SessionTasks {
    /// The read pump task.
    pub read: JoinHandle<()>,
    /// The write pump task.
    pub write: JoinHandle<()>,
}

impl SessionTasks {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        let (read, write) = tokio::join!(self.read, self.write);
        if let Err(e) = read {
            warn!(error = %e, "Read pump panicked");
        }
        if let Err(e) = write {
            warn!(error = %e, "Write pump panicked");
        }
    }
}

/// Spawn both pumps of a session onto the runtime.
pub fn spawn_pumps<R, W>(
    mailbox: Mailbox,
    reader: R,
    writer: W,
    hub: HubHandle,
    format: WireFormat,
) -> SessionTasks
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (read, write) = mailbox.into_pumps(reader, writer, hub, format);
    SessionTasks {
        read: tokio::spawn(read.run()),
        write: tokio::spawn(write.run()),
    }
}
