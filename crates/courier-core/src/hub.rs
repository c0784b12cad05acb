//! The hub: process-wide registry and router.
//!
//! The hub is a single task that owns the identity -> session map. Nothing
//! else touches the map; callers talk to it through a [`HubHandle`], and each
//! event is fully applied before the next one is taken. That gives three
//! guarantees without any lock:
//!
//! - at most one session is current per identity, and a displaced session is
//!   closed in the same step that installs its replacement
//! - an unregister only removes the exact session it names
//! - deliveries to one recipient happen in hub-arrival order
//!
//! Delivery never waits on a consumer. A recipient whose outbound queue is
//! full is evicted.

use crate::envelope::{Envelope, Identity};
use crate::session::{Session, SessionId, SessionKey};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default hub event queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Hub errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub loop has stopped.
    #[error("Hub has stopped")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the event queue feeding the hub loop.
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// An event processed by the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    /// Install a session as current for its identity.
    Register(Session),
    /// Remove the named session if it is still current.
    Unregister(SessionKey),
    /// Route an envelope to its recipient.
    Forward(Envelope),
    /// Report statistics.
    Snapshot(oneshot::Sender<HubStats>),
}

/// What happened to a forwarded envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Enqueued on the recipient's outbound queue.
    Delivered,
    /// No current session for the recipient; dropped.
    Offline,
    /// The recipient's queue was full; the recipient was evicted.
    Evicted,
    /// The recipient's connection was already gone; entry removed, dropped.
    Gone,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of current sessions.
    pub sessions: usize,
    /// Sessions registered since start.
    pub registered: u64,
    /// Sessions closed because a newer one registered for the same identity.
    pub replaced: u64,
    /// Sessions removed by unregister.
    pub unregistered: u64,
    /// Envelopes enqueued for delivery.
    pub forwarded: u64,
    /// Envelopes dropped because the recipient was not connected.
    pub dropped_offline: u64,
    /// Sessions evicted for a full outbound queue.
    pub evicted: u64,
}

/// Cloneable handle for sending events to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }

    /// Register a session, replacing any current session for its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn register(&self, session: Session) -> Result<(), HubError> {
        self.send(HubEvent::Register(session)).await
    }

    /// Unregister the named session.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(&self, key: SessionKey) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(key)).await
    }

    /// Forward an envelope to its recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn forward(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubEvent::Forward(envelope)).await
    }

    /// Get hub statistics, consistent with every event sent before.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn snapshot(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Whether the hub loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// The hub loop and the registry it owns.
pub struct Hub {
    sessions: HashMap<Identity, Session>,
    events: mpsc::Receiver<HubEvent>,
    stats: HubStats,
}

impl Hub {
    /// Create a hub and the first handle to it.
    #[must_use]
    pub fn new(config: HubConfig) -> (Hub, HubHandle) {
        info!("Creating hub with config: {:?}", config);
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        (
            Hub {
                sessions: HashMap::new(),
                events: rx,
                stats: HubStats::default(),
            },
            HubHandle { events: tx },
        )
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the loop until every handle is dropped, then close all sessions.
    pub async fn run(mut self) {
        debug!("Hub started");

        while let Some(event) = self.events.recv().await {
            self.apply(event);
        }

        let remaining = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.close();
        }
        info!(sessions = remaining, "Hub stopped");
    }

    /// Apply one event. This is one step of the loop.
    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.register(session),
            HubEvent::Unregister(key) => {
                self.unregister(&key);
            }
            HubEvent::Forward(envelope) => {
                self.forward(envelope);
            }
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Install a session, closing any session it displaces first.
    pub fn register(&mut self, session: Session) {
        let identity = session.identity().clone();

        if let Some(previous) = self.sessions.remove(&identity) {
            debug!(
                identity = %identity,
                previous = %previous.id(),
                session = %session.id(),
                "Replacing session"
            );
            previous.close();
            self.stats.replaced += 1;
        }

        debug!(identity = %identity, session = %session.id(), "Registered");
        self.sessions.insert(identity, session);
        self.stats.registered += 1;
    }

    /// Remove the named session if it is still current.
    ///
    /// Returns `true` if the registry changed.
    pub fn unregister(&mut self, key: &SessionKey) -> bool {
        match self.sessions.get(key.identity()) {
            Some(current) if current.id() == key.id() => {
                if let Some(session) = self.sessions.remove(key.identity()) {
                    session.close();
                }
                self.stats.unregistered += 1;
                debug!(identity = %key.identity(), session = %key.id(), "Unregistered");
                true
            }
            _ => {
                trace!(identity = %key.identity(), session = %key.id(), "Ignoring stale unregister");
                false
            }
        }
    }

    /// Route an envelope without waiting on the recipient.
    pub fn forward(&mut self, envelope: Envelope) -> ForwardOutcome {
        let Some(session) = self.sessions.get(envelope.recipient()) else {
            trace!(recipient = %envelope.recipient(), "Recipient offline");
            self.stats.dropped_offline += 1;
            return ForwardOutcome::Offline;
        };

        match session.try_deliver(envelope) {
            Ok(()) => {
                self.stats.forwarded += 1;
                ForwardOutcome::Delivered
            }
            Err(TrySendError::Full(envelope)) => {
                let recipient = envelope.recipient();
                if let Some(session) = self.sessions.remove(recipient) {
                    warn!(
                        identity = %recipient,
                        session = %session.id(),
                        "Outbound queue full, evicting"
                    );
                    session.close();
                }
                self.stats.evicted += 1;
                ForwardOutcome::Evicted
            }
            Err(TrySendError::Closed(envelope)) => {
                let recipient = envelope.recipient();
                if let Some(session) = self.sessions.remove(recipient) {
                    debug!(identity = %recipient, session = %session.id(), "Pruning dead session");
                    session.close();
                }
                self.stats.dropped_offline += 1;
                ForwardOutcome::Gone
            }
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.sessions.len(),
            ..self.stats.clone()
        }
    }

    /// The current session id for an identity.
    #[must_use]
    pub fn current(&self, identity: &str) -> Option<SessionId> {
        self.sessions.get(identity).map(Session::id)
    }

    /// Whether an identity has a current session.
    #[must_use]
    pub fn is_registered(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Number of current sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> Hub {
        Hub::new(HubConfig::default()).0
    }

    fn open(identity: &str, capacity: usize) -> (Session, crate::session::Mailbox) {
        Session::open(Identity::from(identity), capacity)
    }

    #[test]
    fn test_register_and_forward() {
        let mut hub = hub();
        let (bob, mut bob_box) = open("bob", 8);
        hub.register(bob);

        let outcome = hub.forward(Envelope::new("bob", "alice", b"hi".to_vec()));
        assert_eq!(outcome, ForwardOutcome::Delivered);

        let received = bob_box.try_recv().unwrap();
        assert_eq!(received, Envelope::new("bob", "alice", b"hi".to_vec()));
        assert_eq!(hub.stats().forwarded, 1);
    }

    #[test]
    fn test_register_replaces_and_closes_previous() {
        let mut hub = hub();
        let (first, mut first_box) = open("alice", 8);
        let (second, mut second_box) = open("alice", 8);
        let second_id = second.id();

        hub.register(first);
        hub.register(second);

        assert_eq!(hub.len(), 1);
        assert_eq!(hub.current("alice"), Some(second_id));
        assert!(!first_box.is_alive());
        assert!(matches!(
            first_box.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
        assert!(second_box.is_alive());
        assert!(matches!(second_box.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(hub.stats().replaced, 1);
    }

    #[test]
    fn test_stale_unregister_is_ignored() {
        let mut hub = hub();
        let (first, first_box) = open("alice", 8);
        let (second, second_box) = open("alice", 8);
        let second_id = second.id();

        hub.register(first);
        hub.register(second);

        assert!(!hub.unregister(first_box.key()));
        assert_eq!(hub.current("alice"), Some(second_id));
        assert!(second_box.is_alive());

        assert!(hub.unregister(second_box.key()));
        assert!(!hub.is_registered("alice"));
        assert!(!second_box.is_alive());
        assert_eq!(hub.stats().unregistered, 1);
    }

    #[test]
    fn test_full_queue_evicts_recipient() {
        let mut hub = hub();
        let (bob, mut bob_box) = open("bob", 2);
        hub.register(bob);

        for _ in 0..2 {
            assert_eq!(
                hub.forward(Envelope::new("bob", "alice", b"x".to_vec())),
                ForwardOutcome::Delivered
            );
        }
        assert_eq!(
            hub.forward(Envelope::new("bob", "alice", b"x".to_vec())),
            ForwardOutcome::Evicted
        );

        assert!(!hub.is_registered("bob"));
        assert!(!bob_box.is_alive());
        // Already queued envelopes still drain, then the queue reports closed
        assert!(bob_box.try_recv().is_ok());
        assert!(bob_box.try_recv().is_ok());
        assert!(matches!(bob_box.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(hub.stats().evicted, 1);

        // Later traffic is a route miss
        assert_eq!(
            hub.forward(Envelope::new("bob", "alice", b"x".to_vec())),
            ForwardOutcome::Offline
        );
    }

    #[test]
    fn test_forward_to_offline_is_noop() {
        let mut hub = hub();
        let (alice, mut alice_box) = open("alice", 8);
        hub.register(alice);
        let before = hub.stats();

        let outcome = hub.forward(Envelope::new("bob", "alice", b"hi".to_vec()));

        assert_eq!(outcome, ForwardOutcome::Offline);
        assert_eq!(hub.len(), 1);
        assert!(matches!(alice_box.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(
            hub.stats(),
            HubStats {
                dropped_offline: before.dropped_offline + 1,
                ..before
            }
        );
    }

    #[test]
    fn test_forward_to_dead_mailbox_prunes() {
        let mut hub = hub();
        let (bob, bob_box) = open("bob", 8);
        hub.register(bob);
        drop(bob_box);

        assert_eq!(
            hub.forward(Envelope::new("bob", "alice", b"hi".to_vec())),
            ForwardOutcome::Gone
        );
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_loop_applies_events_in_order() {
        let (handle, task) = Hub::spawn(HubConfig::default());
        let (alice, alice_box) = open("alice", 8);
        let (bob, mut bob_box) = open("bob", 8);

        handle.register(alice).await.unwrap();
        handle.register(bob).await.unwrap();
        for i in 0..5u8 {
            handle
                .forward(Envelope::new("bob", "alice", vec![i]))
                .await
                .unwrap();
        }
        handle.unregister(alice_box.key().clone()).await.unwrap();

        let stats = handle.snapshot().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.forwarded, 5);
        assert_eq!(stats.unregistered, 1);

        for i in 0..5u8 {
            assert_eq!(&bob_box.recv().await.unwrap().payload()[..], &[i]);
        }

        drop(handle);
        task.await.unwrap();
        // Shutdown closes remaining sessions
        assert!(!bob_box.is_alive());
        assert!(bob_box.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_hub() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        assert!(handle.is_closed());
        assert_eq!(
            handle.forward(Envelope::new("bob", "alice", b"x".to_vec())).await,
            Err(HubError::Closed)
        );
        assert_eq!(handle.snapshot().await, Err(HubError::Closed));
    }
}
