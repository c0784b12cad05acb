//! Public key directory.
//!
//! Endpoints fetch each other's public keys out of band to encrypt payloads.
//! The relay only stores and serves the bytes; routing never consults them.

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::envelope::Identity;

/// Key lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyLookupError {
    /// The identity is unknown.
    #[error("user not found: {0}")]
    NotFound(String),

    /// The identity is known but published no key.
    #[error("user has no public key: {0}")]
    NoKey(String),
}

/// Looks up public key material by identity.
pub trait KeyDirectory: Send + Sync {
    /// Fetch the public key for an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is unknown or has no key.
    fn lookup(&self, identity: &str) -> Result<Bytes, KeyLookupError>;
}

/// In-memory key directory.
#[derive(Debug, Default)]
pub struct MemoryKeyDirectory {
    keys: DashMap<Identity, Option<Bytes>>,
}

impl MemoryKeyDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) the key for an identity.
    pub fn publish(&self, identity: Identity, key: impl Into<Bytes>) {
        let key = key.into();
        debug!(identity = %identity, bytes = key.len(), "Published public key");
        self.keys.insert(identity, Some(key));
    }

    /// Make an identity known without a key.
    pub fn enroll(&self, identity: Identity) {
        self.keys.entry(identity).or_insert(None);
    }

    /// Forget an identity.
    pub fn remove(&self, identity: &str) -> bool {
        self.keys.remove(identity).is_some()
    }

    /// Number of known identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyDirectory for MemoryKeyDirectory {
    fn lookup(&self, identity: &str) -> Result<Bytes, KeyLookupError> {
        let entry = self
            .keys
            .get(identity)
            .ok_or_else(|| KeyLookupError::NotFound(identity.to_string()))?;

        match entry.value() {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(KeyLookupError::NoKey(identity.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let directory = MemoryKeyDirectory::new();
        directory.publish(Identity::from("alice"), b"alice-key".to_vec());
        directory.enroll(Identity::from("bob"));

        assert_eq!(&directory.lookup("alice").unwrap()[..], b"alice-key");
        assert_eq!(
            directory.lookup("bob"),
            Err(KeyLookupError::NoKey("bob".into()))
        );
        assert_eq!(
            directory.lookup("carol"),
            Err(KeyLookupError::NotFound("carol".into()))
        );
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_enroll_keeps_existing_key() {
        let directory = MemoryKeyDirectory::new();
        directory.publish(Identity::from("alice"), b"k".to_vec());
        directory.enroll(Identity::from("alice"));
        assert!(directory.lookup("alice").is_ok());

        assert!(directory.remove("alice"));
        assert!(directory.is_empty());
    }
}
