//! JWT infrastructure - key resolution, verification and key set caching
//!
//! ```text
//! raw token ──► keys::resolve ──► validator::TokenVerifier ──► ClaimSet
//!                    ▲                 (core claims, then audience)
//!                    │
//!             jwks::KeySetStore (atomically swapped snapshot)
//! ```
//!
//! # Modules
//!
//! - `keys` - key set snapshot and key lookup by `kid`
//! - `validator` - signature, expiry, issuer and audience verification
//! - `jwks` - key set sources and the refreshable store

pub mod jwks;
pub mod keys;
pub mod validator;

// Re-export commonly used types
pub use jwks::{HttpKeySetSource, KeySetSource, KeySetStore, RefreshPolicy, StaticKeySetSource};
pub use keys::{KeySet, ResolvedKey, resolve};
pub use validator::{AudienceMatch, TokenVerifier, VerifierConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The `aud` claim
///
/// RFC 7519 allows either a single string or an array of strings, and
/// identity providers use both shapes for the same client depending on how
/// the client is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "react-client"`
    Single(String),
    /// `"aud": ["react-client", "account"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `expected` is (or is among) the audience values
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Self::Single(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

/// Realm-level role grants (`realm_access`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleGrants {
    /// Granted role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims of a verified access token
///
/// Only ever constructed by [`TokenVerifier`] after signature, expiry, issuer
/// and audience have all been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Subject (sub) - the authenticated principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer (iss)
    pub iss: String,

    /// Audience (aud) - string or array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Authorized party (azp) - the client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Expiration Time (exp) - Unix timestamp
    pub exp: u64,

    /// Issued At (iat) - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Human-readable login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Realm role grants
    #[serde(default)]
    pub realm_access: RoleGrants,

    /// Claims not modelled above, kept verbatim
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

impl ClaimSet {
    /// Granted realm roles
    pub fn roles(&self) -> &[String] {
        &self.realm_access.roles
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.exp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Issued-at as a timestamp
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat
            .and_then(|iat| i64::try_from(iat).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}
