//! JWT verification
//!
//! Verification runs as two explicit steps:
//!
//! 1. [`TokenVerifier::verify_core`] - algorithm selection, signature, `exp`,
//!    `nbf` and `iss`. The audience is never looked at here.
//! 2. [`TokenVerifier::check_audience`] - applied to claims that passed step 1.
//!    First the standard rule (`aud` equals or contains the expected
//!    audience), then, only when that rule fails, the authorized-party
//!    fallback (`azp` equals the expected audience) if the policy allows it.
//!
//! A signature, expiry or issuer failure returns from step 1 and so can never
//! reach the audience fallback.
//!
//! # Algorithm selection
//!
//! The header's `alg` is only a request. It is honoured when it is in the
//! configured accepted set *and* fits the resolved key: RS*/PS* for RSA keys,
//! ES256/ES384 for P-256/P-384 keys, EdDSA for Ed25519 keys, and the JWK's own
//! `alg` when it declares one. Symmetric keys never verify anything.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode};
use tracing::{debug, info};

use super::ClaimSet;
use super::keys::ResolvedKey;
use crate::config::AudiencePolicy;
use crate::error::{AuthError, ConfigError, Result};

/// What the verifier expects of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Expected issuer (iss claim), exact match
    pub expected_issuer: String,
    /// Expected audience - the client id of this application
    pub expected_audience: String,
    /// Accepted signature algorithms (default: RS256)
    pub accepted_algorithms: Vec<Algorithm>,
    /// Clock skew tolerance for exp/nbf (default: none)
    pub leeway: Duration,
    /// Whether `azp` may stand in for `aud`
    pub audience_policy: AudiencePolicy,
}

impl VerifierConfig {
    /// RS256 only, no leeway, authorized-party fallback enabled
    pub fn new(expected_issuer: impl Into<String>, expected_audience: impl Into<String>) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            accepted_algorithms: vec![Algorithm::RS256],
            leeway: Duration::ZERO,
            audience_policy: AudiencePolicy::default(),
        }
    }

    /// Set accepted algorithms
    ///
    /// # Security Warning
    ///
    /// Only asymmetric algorithms are valid here; [`validate`](Self::validate)
    /// rejects HS256/384/512.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.accepted_algorithms = algorithms;
        self
    }

    /// Set clock skew tolerance
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Set audience policy
    #[must_use]
    pub fn with_audience_policy(mut self, policy: AudiencePolicy) -> Self {
        self.audience_policy = policy;
        self
    }

    /// Check that this configuration can verify anything safely
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty issuer/audience, an empty algorithm
    /// set, or a symmetric algorithm.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.expected_issuer.is_empty() {
            return Err(ConfigError::Empty("issuer"));
        }
        if self.expected_audience.is_empty() {
            return Err(ConfigError::Empty("audience"));
        }
        if self.accepted_algorithms.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        if let Some(alg) = self
            .accepted_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(ConfigError::SymmetricAlgorithm(*alg));
        }
        Ok(())
    }
}

/// How a token satisfied the audience check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceMatch {
    /// `aud` equals or contains the expected audience
    Audience,
    /// `aud` did not match; `azp` equals the expected audience
    AuthorizedParty,
}

/// Token verifier
///
/// Stateless apart from its configuration; share it freely between tasks.
///
/// # Example
///
/// ```rust
/// use tokengate_auth::jwt::{KeySet, TokenVerifier, VerifierConfig, resolve};
///
/// let verifier = TokenVerifier::new(VerifierConfig::new(
///     "http://localhost:8080/realms/myrealm",
///     "react-client",
/// ))?;
///
/// let keys = KeySet::from_json(r#"{"keys": []}"#)?;
/// # let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6Im1pc3NpbmcifQ.e30.c2ln";
/// match resolve(&keys, token).and_then(|key| verifier.verify(token, &key)) {
///     Ok(claims) => println!("token for {:?}", claims.sub),
///     Err(e) => println!("rejected: {}", e.public_message()),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    config: VerifierConfig,
}

impl TokenVerifier {
    /// Create a verifier
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if [`VerifierConfig::validate`] fails.
    pub fn new(config: VerifierConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Verifier configuration
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Full verification: [`verify_core`](Self::verify_core) then
    /// [`check_audience`](Self::check_audience)
    ///
    /// # Errors
    ///
    /// - [`AuthError::AlgorithmMismatch`] - header algorithm not accepted or not usable with the key
    /// - [`AuthError::TokenExpired`] - `exp` in the past
    /// - [`AuthError::AudienceRejected`] - neither `aud` nor (if allowed) `azp` matches
    /// - [`AuthError::InvalidToken`] - anything else
    pub fn verify(&self, token: &str, key: &ResolvedKey<'_>) -> Result<ClaimSet> {
        let claims = self.verify_core(token, key)?;
        let matched = self.check_audience(&claims)?;

        info!(
            sub = ?claims.sub,
            aud = ?claims.aud,
            azp = ?claims.azp,
            audience_match = ?matched,
            "Token validated"
        );

        Ok(claims)
    }

    /// Signature, expiry and issuer verification, audience not enforced
    ///
    /// The returned claims are cryptographically authentic but not yet
    /// authorized for this application; pass them to
    /// [`check_audience`](Self::check_audience) before trusting them.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify) except `AudienceRejected`.
    pub fn verify_core(&self, token: &str, key: &ResolvedKey<'_>) -> Result<ClaimSet> {
        let algorithm = self.select_algorithm(key)?;

        let decoding_key = DecodingKey::from_jwk(key.jwk).map_err(|e| {
            debug!(kid = %key.kid, error = %e, "Failed to create decoding key from JWK");
            AuthError::invalid(format!("unusable JWK '{}': {e}", key.kid))
        })?;

        let validation = self.core_validation(algorithm);

        let token_data: TokenData<ClaimSet> =
            decode(token, &decoding_key, &validation).map_err(|e| {
                let rejection = classify(&e);
                debug!(
                    kid = %key.kid,
                    error = %e,
                    rejection = %rejection.kind(),
                    issuer = %self.config.expected_issuer,
                    "JWT validation failed"
                );
                rejection
            })?;

        Ok(token_data.claims)
    }

    /// Audience acceptance for claims that passed [`verify_core`](Self::verify_core)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AudienceRejected`] carrying the observed `aud` and
    /// `azp` when no rule accepts the token.
    pub fn check_audience(&self, claims: &ClaimSet) -> Result<AudienceMatch> {
        let expected = self.config.expected_audience.as_str();

        if claims.aud.as_ref().is_some_and(|aud| aud.contains(expected)) {
            return Ok(AudienceMatch::Audience);
        }

        debug!(
            aud = ?claims.aud,
            azp = ?claims.azp,
            expected = expected,
            "JWT audience check failed, inspecting authorized party"
        );
        self.audience_fallback(claims)
    }

    /// Reached only after the `aud` rule rejected the token
    fn audience_fallback(&self, claims: &ClaimSet) -> Result<AudienceMatch> {
        let expected = self.config.expected_audience.as_str();

        if self.config.audience_policy == AudiencePolicy::AllowAuthorizedParty
            && claims.azp.as_deref() == Some(expected)
        {
            debug!(azp = expected, "Audience accepted via authorized party");
            return Ok(AudienceMatch::AuthorizedParty);
        }

        debug!(
            aud = ?claims.aud,
            azp = ?claims.azp,
            expected = expected,
            policy = ?self.config.audience_policy,
            "Invalid audience after fallback"
        );
        Err(AuthError::AudienceRejected {
            aud: claims.aud.clone(),
            azp: claims.azp.clone(),
            expected: expected.to_string(),
        })
    }

    fn select_algorithm(&self, key: &ResolvedKey<'_>) -> Result<Algorithm> {
        let requested = key.header.alg;

        if self.config.accepted_algorithms.contains(&requested) && key_supports(key.jwk, requested)
        {
            return Ok(requested);
        }

        debug!(
            algorithm = ?requested,
            accepted = ?self.config.accepted_algorithms,
            kid = %key.kid,
            key_type = %key.key_type(),
            "JWT algorithm not allowed for key"
        );
        Err(AuthError::AlgorithmMismatch {
            algorithm: format!("{requested:?}"),
            kid: key.kid.clone(),
            key_type: key.key_type(),
        })
    }

    fn core_validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.config.leeway.as_secs();
        validation.validate_exp = true;
        // `exp == now` is already expired
        validation.reject_tokens_expiring_in_less_than = 1;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_issuer(&[self.config.expected_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation
    }
}

/// Map library errors onto the rejection taxonomy; only expiry is singled out
fn classify(error: &jsonwebtoken::errors::Error) -> AuthError {
    match error.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::invalid(error),
    }
}

/// Whether `jwk` may verify a signature made with `algorithm`
fn key_supports(jwk: &Jwk, algorithm: Algorithm) -> bool {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return false;
    }

    let family_ok = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(params) => matches!(
            (&params.curve, algorithm),
            (EllipticCurve::P256, Algorithm::ES256) | (EllipticCurve::P384, Algorithm::ES384)
        ),
        AlgorithmParameters::OctetKeyPair(params) => matches!(
            (&params.curve, algorithm),
            (EllipticCurve::Ed25519, Algorithm::EdDSA)
        ),
        AlgorithmParameters::OctetKey(_) => false,
    };

    family_ok
        && jwk
            .common
            .key_algorithm
            .as_ref()
            .is_none_or(|declared| declared_algorithm(declared) == Some(algorithm))
}

fn declared_algorithm(declared: &KeyAlgorithm) -> Option<Algorithm> {
    let algorithm = match declared {
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        _ => return None,
    };
    Some(algorithm)
}
