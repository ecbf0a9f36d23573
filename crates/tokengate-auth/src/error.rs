//! Error types
//!
//! Three families, one per kind of caller:
//!
//! - [`AuthError`] - rejection of a presented token (or of a role requirement).
//!   Terminal for the request. The `Display` output carries the observed values
//!   for server-side logs; callers that answer a client use
//!   [`AuthError::public_message`] instead.
//! - [`JwksError`] - failure to obtain a key set from its source.
//! - [`ConfigError`] - invalid or unloadable configuration.

use http::StatusCode;
use thiserror::Error;

use crate::jwt::Audience;

/// Result type for token verification
pub type Result<T> = std::result::Result<T, AuthError>;

/// Stable classification of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Header or overall structure could not be parsed
    MalformedToken,
    /// Header carries no `kid`
    MissingKeyId,
    /// No key in the current key set has the token's `kid`
    UnknownKeyId,
    /// Token algorithm is not accepted or does not fit the resolved key
    AlgorithmMismatch,
    /// `exp` lies in the past
    TokenExpired,
    /// Audience policy found no acceptable audience
    AudienceRejected,
    /// Any other verification failure
    InvalidToken,
    /// Token is valid but lacks the required role
    Forbidden,
}

impl RejectionKind {
    /// Short machine-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::MissingKeyId => "missing_key_id",
            Self::UnknownKeyId => "unknown_key_id",
            Self::AlgorithmMismatch => "algorithm_mismatch",
            Self::TokenExpired => "token_expired",
            Self::AudienceRejected => "audience_rejected",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token rejection
///
/// Every variant maps onto exactly one [`RejectionKind`]. The fields exist for
/// logging; they are never part of [`public_message`](Self::public_message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Malformed token: {reason}")]
    MalformedToken { reason: String },

    #[error("Token header has no key id (kid)")]
    MissingKeyId,

    #[error("No key with id '{kid}' in key set")]
    UnknownKeyId { kid: String },

    #[error("Algorithm {algorithm} not accepted for key '{kid}' (key type {key_type})")]
    AlgorithmMismatch {
        algorithm: String,
        kid: String,
        key_type: String,
    },

    #[error("Token expired")]
    TokenExpired,

    #[error("Audience rejected: aud={aud:?} azp={azp:?} expected={expected}")]
    AudienceRejected {
        aud: Option<Audience>,
        azp: Option<String>,
        expected: String,
    },

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("Missing required role '{role}'")]
    Forbidden { role: String },
}

impl AuthError {
    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedToken {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl std::fmt::Display) -> Self {
        Self::InvalidToken {
            reason: reason.to_string(),
        }
    }

    /// Classification of this rejection
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::MalformedToken { .. } => RejectionKind::MalformedToken,
            Self::MissingKeyId => RejectionKind::MissingKeyId,
            Self::UnknownKeyId { .. } => RejectionKind::UnknownKeyId,
            Self::AlgorithmMismatch { .. } => RejectionKind::AlgorithmMismatch,
            Self::TokenExpired => RejectionKind::TokenExpired,
            Self::AudienceRejected { .. } => RejectionKind::AudienceRejected,
            Self::InvalidToken { .. } => RejectionKind::InvalidToken,
            Self::Forbidden { .. } => RejectionKind::Forbidden,
        }
    }

    /// Message safe to return to the presenter of the token
    ///
    /// Deliberately coarse: key lookup, algorithm and signature failures all
    /// read "Invalid token" so the response cannot be used as an oracle.
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            RejectionKind::TokenExpired => "Token expired",
            RejectionKind::AudienceRejected => "Invalid audience",
            RejectionKind::Forbidden => "Forbidden",
            RejectionKind::MalformedToken => "Invalid token header",
            RejectionKind::MissingKeyId
            | RejectionKind::UnknownKeyId
            | RejectionKind::AlgorithmMismatch
            | RejectionKind::InvalidToken => "Invalid token",
        }
    }

    /// HTTP status a request guard should answer with
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            RejectionKind::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Key set retrieval errors
#[derive(Debug, Error)]
pub enum JwksError {
    /// Endpoint is neither HTTPS nor a localhost URL
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for localhost): {0}")]
    InsecureEndpoint(String),

    /// HTTP request failed
    #[error("JWKS fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("JWKS endpoint returned status {0}")]
    Status(StatusCode),

    /// Body is not a JWK set
    #[error("Invalid JWKS format: {0}")]
    InvalidJson(String),

    /// The source returned a key set without keys
    #[error("JWKS contains no keys")]
    Empty,

    /// The source has nothing to serve
    #[error("Key set source unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Loading from file or environment failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A required string option is empty
    #[error("Configuration option '{0}' must not be empty")]
    Empty(&'static str),

    /// No signature algorithm accepted
    #[error("accepted_algorithms must contain at least one algorithm")]
    NoAlgorithms,

    /// Symmetric algorithms cannot be verified with a public key set
    #[error("Algorithm {0:?} is symmetric; only asymmetric algorithms are accepted")]
    SymmetricAlgorithm(jsonwebtoken::Algorithm),

    /// Key set endpoint is not a URL
    #[error("Invalid key_set_endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The initial key set could not be obtained
    #[error("Failed to load initial key set: {0}")]
    KeySet(#[from] JwksError),
}
