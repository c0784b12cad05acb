//! Connection gateway.
//!
//! The gateway is the only way a session comes into existence:
//!
//! 1. [`Gateway::admit`] validates the credential. Nothing else happens for
//!    a caller that fails here.
//! 2. [`Gateway::attach`] opens a session for the identity the credential
//!    proved, registers it with the hub, and starts its pumps.
//!
//! The identity is taken from the [`Admission`] only, which can only be
//! produced by `admit`.

use crate::auth::{AuthError, CredentialValidator};
use crate::envelope::Identity;
use crate::hub::{HubError, HubHandle};
use crate::session::{spawn_pumps, Session, SessionTasks, DEFAULT_QUEUE_CAPACITY};
use courier_protocol::WireFormat;
use courier_transport::{FrameReader, FrameWriter};
use std::sync::Arc;
use tracing::debug;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound queue capacity of each session.
    pub session_queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Proof that a credential was validated.
#[derive(Debug)]
pub struct Admission {
    identity: Identity,
}

impl Admission {
    /// The authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Authenticates connections and turns them into registered sessions.
#[derive(Clone)]
pub struct Gateway {
    hub: HubHandle,
    validator: Arc<dyn CredentialValidator>,
    config: GatewayConfig,
}

impl Gateway {
    /// Create a gateway.
    #[must_use]
    pub fn new(
        hub: HubHandle,
        validator: Arc<dyn CredentialValidator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            hub,
            validator,
            config,
        }
    }

    /// The hub this gateway registers sessions with.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Validate a credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Missing`] for an absent or empty credential, or
    /// the validator's error.
    pub fn admit(&self, credential: Option<&str>) -> Result<Admission, AuthError> {
        let credential = credential
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::Missing)?;
        let identity = self.validator.validate(credential)?;

        debug!(identity = %identity, "Credential accepted");
        Ok(Admission { identity })
    }

    /// Open, register, and start a session for an admitted connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped; the transport halves are
    /// dropped in that case.
    pub async fn attach<R, W>(
        &self,
        admission: Admission,
        reader: R,
        writer: W,
        format: WireFormat,
    ) -> Result<SessionTasks, HubError>
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        let (session, mailbox) =
            Session::open(admission.identity, self.config.session_queue_capacity);
        debug!(session = %session.id(), identity = %session.identity(), "Attaching session");

        self.hub.register(session).await?;
        Ok(spawn_pumps(mailbox, reader, writer, self.hub.clone(), format))
    }
}
