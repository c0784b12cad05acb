//! Credential validation.
//!
//! The gateway turns a credential into an [`Identity`] through a
//! [`CredentialValidator`] before any session exists. The shipped validator
//! checks HS256-signed JSON Web Tokens with a `username` claim.

use crate::envelope::Identity;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Authentication errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    #[error("authentication token required")]
    Missing,

    /// The credential is not a well-formed token.
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// The signature does not match.
    #[error("invalid token signature")]
    BadSignature,

    /// The token has expired.
    #[error("token expired")]
    Expired,

    /// The token is not valid yet.
    #[error("token not yet valid")]
    NotYetValid,

    /// The token names no identity.
    #[error("token carries no identity")]
    MissingIdentity,

    /// The signing key was rejected.
    #[error("invalid signing key")]
    InvalidKey,
}

/// Validates a credential and yields the identity it proves.
pub trait CredentialValidator: Send + Sync {
    /// Validate a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential does not prove an identity.
    fn validate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default)]
    username: String,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// HS256 JSON Web Token validator and issuer.
#[derive(Clone)]
pub struct HmacTokenValidator {
    secret: Vec<u8>,
    leeway_secs: u64,
}

impl std::fmt::Debug for HmacTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenValidator")
            .field("secret", &"[redacted]")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl HmacTokenValidator {
    /// Create a validator for the given shared secret.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            leeway_secs: 0,
        }
    }

    /// Allow some clock skew when checking `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway_secs = leeway.as_secs();
        self
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidKey)
    }

    /// Issue a token for an identity, valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key is rejected or the claims cannot
    /// be serialized.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let now = unix_now();
        self.sign(&Claims {
            username: identity.to_string(),
            exp: Some(now + ttl.as_secs()),
            nbf: Some(now),
            iat: Some(now),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = Header {
            alg: "HS256".into(),
            typ: Some("JWT".into()),
        };
        let header = serde_json::to_vec(&header).map_err(|_| AuthError::Malformed("header"))?;
        let claims = serde_json::to_vec(claims).map_err(|_| AuthError::Malformed("claims"))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }
}

impl CredentialValidator for HmacTokenValidator {
    fn validate(&self, credential: &str) -> Result<Identity, AuthError> {
        let mut segments = credential.split('.');
        let (Some(header), Some(claims), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::Malformed("expected three segments"));
        };

        let header: Header = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AuthError::Malformed("header"))?;
        if header.alg != "HS256" {
            return Err(AuthError::Malformed("unsupported algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed("signature encoding"))?;

        // Signing input is the first two segments exactly as received
        let signing_input = credential
            .rsplit_once('.')
            .map_or("", |(input, _)| input);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(claims)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(AuthError::Malformed("claims"))?;

        let now = unix_now();
        let exp = claims.exp.ok_or(AuthError::Malformed("missing exp"))?;
        if now >= exp.saturating_add(self.leeway_secs) {
            return Err(AuthError::Expired);
        }
        if let Some(nbf) = claims.nbf {
            if now.saturating_add(self.leeway_secs) < nbf {
                return Err(AuthError::NotYetValid);
            }
        }
        if claims.username.is_empty() {
            return Err(AuthError::MissingIdentity);
        }

        Ok(Identity::from(claims.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn validator() -> HmacTokenValidator {
        HmacTokenValidator::new(SECRET)
    }

    #[test]
    fn test_issue_and_validate() {
        let v = validator();
        let token = v.issue(&Identity::from("alice"), DEFAULT_TOKEN_TTL).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(v.validate(&token).unwrap().as_str(), "alice");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = HmacTokenValidator::new("other")
            .issue(&Identity::from("alice"), DEFAULT_TOKEN_TTL)
            .unwrap();
        assert_eq!(validator().validate(&token), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let v = validator();
        let token = v.issue(&Identity::from("alice"), DEFAULT_TOKEN_TTL).unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"username":"mallory","exp":99999999999}"#);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged;
        assert_eq!(v.validate(&parts.join(".")), Err(AuthError::BadSignature));
    }

    #[test]
    fn test_expired_rejected() {
        let v = validator();
        let now = unix_now();
        let token = v
            .sign(&Claims {
                username: "alice".into(),
                exp: Some(now - 10),
                nbf: None,
                iat: Some(now - 100),
            })
            .unwrap();
        assert_eq!(v.validate(&token), Err(AuthError::Expired));
        assert!(v
            .clone()
            .with_leeway(Duration::from_secs(60))
            .validate(&token)
            .is_ok());
    }

    #[test]
    fn test_not_yet_valid_rejected() {
        let v = validator();
        let now = unix_now();
        let token = v
            .sign(&Claims {
                username: "alice".into(),
                exp: Some(now + 3600),
                nbf: Some(now + 600),
                iat: Some(now),
            })
            .unwrap();
        assert_eq!(v.validate(&token), Err(AuthError::NotYetValid));
    }

    #[test]
    fn test_missing_identity_and_exp() {
        let v = validator();
        let now = unix_now();
        let anonymous = v
            .sign(&Claims {
                username: String::new(),
                exp: Some(now + 3600),
                nbf: None,
                iat: None,
            })
            .unwrap();
        assert_eq!(v.validate(&anonymous), Err(AuthError::MissingIdentity));

        let eternal = v
            .sign(&Claims {
                username: "alice".into(),
                exp: None,
                nbf: None,
                iat: None,
            })
            .unwrap();
        assert_eq!(v.validate(&eternal), Err(AuthError::Malformed("missing exp")));
    }

    #[test]
    fn test_malformed_rejected() {
        let v = validator();
        assert!(matches!(v.validate(""), Err(AuthError::Malformed(_))));
        assert!(matches!(v.validate("a.b"), Err(AuthError::Malformed(_))));
        assert!(matches!(v.validate("a.b.c.d"), Err(AuthError::Malformed(_))));
        assert!(matches!(v.validate("!!.!!.!!"), Err(AuthError::Malformed(_))));
    }

    #[test]
    fn test_none_algorithm_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"username":"mallory","exp":99999999999}"#);
        let token = format!("{}.{}.", header, claims);
        assert_eq!(
            validator().validate(&token),
            Err(AuthError::Malformed("unsupported algorithm"))
        );
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
    }
}
