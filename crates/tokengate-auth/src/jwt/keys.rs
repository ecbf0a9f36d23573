//! Key set snapshot and key resolution
//!
//! [`resolve`] reads the token's header *without* verifying anything and
//! looks up the JWK whose `kid` matches. The header is untrusted input: the
//! only thing taken from it here is the key id. Which algorithm is actually
//! used is decided by the verifier from its accepted set and the key's type.

use std::time::SystemTime;

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet};
use jsonwebtoken::{Header, decode_header};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AuthError, JwksError, Result};

/// Immutable snapshot of a provider's public keys
///
/// `version` increases by one each time the owning store publishes a new
/// snapshot, which lets callers tell whether a refresh actually happened.
#[derive(Debug, Clone)]
pub struct KeySet {
    jwks: JwkSet,
    version: u64,
    fetched_at: SystemTime,
}

impl KeySet {
    /// Create a snapshot at version 0
    pub fn new(jwks: JwkSet) -> Self {
        Self::with_version(jwks, 0)
    }

    pub(crate) fn with_version(jwks: JwkSet, version: u64) -> Self {
        Self {
            jwks,
            version,
            fetched_at: SystemTime::now(),
        }
    }

    /// Parse a `{"keys": [...]}` document
    ///
    /// Entries that are not usable JWKs are skipped, see [`parse_jwk_set`].
    ///
    /// # Errors
    ///
    /// Same as [`parse_jwk_set`].
    pub fn from_json(json: &str) -> std::result::Result<Self, JwksError> {
        parse_jwk_set(json).map(Self::new)
    }

    /// First key whose `kid` equals `kid` exactly, in set order
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
    }

    /// Underlying JWK set
    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.jwks.keys.len()
    }

    /// Whether the set has no keys
    pub fn is_empty(&self) -> bool {
        self.jwks.keys.is_empty()
    }

    /// Snapshot version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this snapshot was built
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }
}

#[derive(Deserialize)]
struct RawJwkSet {
    keys: Vec<serde_json::Value>,
}

/// Parse a `{"keys": [...]}` document, one entry at a time
///
/// Providers publish keys this crate has no use for (encryption keys on
/// curves `jsonwebtoken` does not model, for one). Such entries are logged
/// and dropped instead of failing the whole set.
///
/// # Errors
///
/// - [`JwksError::InvalidJson`] if the document has no `keys` array
/// - [`JwksError::Empty`] if `keys` has entries but none of them parse
pub fn parse_jwk_set(json: &str) -> std::result::Result<JwkSet, JwksError> {
    let raw: RawJwkSet =
        serde_json::from_str(json).map_err(|e| JwksError::InvalidJson(e.to_string()))?;
    let published = raw.keys.len();

    let keys: Vec<Jwk> = raw
        .keys
        .into_iter()
        .filter_map(|entry| {
            let kid = entry
                .get("kid")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<none>")
                .to_string();
            serde_json::from_value(entry)
                .map_err(|e| warn!(kid = %kid, error = %e, "Skipping unparseable JWK"))
                .ok()
        })
        .collect();

    if published > 0 && keys.is_empty() {
        return Err(JwksError::Empty);
    }
    Ok(JwkSet { keys })
}

/// A key located for a specific token
#[derive(Debug, Clone)]
pub struct ResolvedKey<'a> {
    /// Key id shared by the token header and the JWK
    pub kid: String,
    /// The token's unverified header
    pub header: Header,
    /// Matching key from the set
    pub jwk: &'a Jwk,
}

impl ResolvedKey<'_> {
    /// Declared key type, for diagnostics (`RSA`, `EC/P-256`, `OKP/Ed25519`, `oct`)
    pub fn key_type(&self) -> String {
        key_type_name(self.jwk)
    }
}

pub(crate) fn key_type_name(jwk: &Jwk) -> String {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => "RSA".to_string(),
        AlgorithmParameters::EllipticCurve(params) => format!("EC/{}", curve_name(&params.curve)),
        AlgorithmParameters::OctetKeyPair(params) => format!("OKP/{}", curve_name(&params.curve)),
        AlgorithmParameters::OctetKey(_) => "oct".to_string(),
    }
}

fn curve_name(curve: &EllipticCurve) -> &'static str {
    match curve {
        EllipticCurve::P256 => "P-256",
        EllipticCurve::P384 => "P-384",
        EllipticCurve::P521 => "P-521",
        EllipticCurve::Ed25519 => "Ed25519",
    }
}

/// Find the key that should verify `token`
///
/// # Errors
///
/// - [`AuthError::MalformedToken`] if the header cannot be decoded
/// - [`AuthError::MissingKeyId`] if the header has no `kid`
/// - [`AuthError::UnknownKeyId`] if no key in `key_set` has that `kid`
pub fn resolve<'a>(key_set: &'a KeySet, token: &str) -> Result<ResolvedKey<'a>> {
    let header = decode_header(token).map_err(|e| {
        debug!(error = %e, "Failed to decode JWT header");
        AuthError::malformed(e)
    })?;

    let kid = match header.kid.as_deref() {
        Some(kid) if !kid.is_empty() => kid.to_string(),
        _ => {
            debug!("JWT header has no kid");
            return Err(AuthError::MissingKeyId);
        }
    };

    debug!(kid = %kid, key_set_version = key_set.version(), "Resolving JWK");

    let jwk = key_set.find(&kid).ok_or_else(|| {
        debug!(kid = %kid, "No matching JWK");
        AuthError::UnknownKeyId { kid: kid.clone() }
    })?;

    Ok(ResolvedKey { kid, header, jwk })
}
