//! Request-facing entry point
//!
//! [`Authenticator`] ties the key set store, the key resolver and the token
//! verifier together behind two calls: [`authenticate`](Authenticator::authenticate)
//! for a raw bearer token and [`authorize`](Authenticator::authorize) for a
//! role requirement.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, ConfigError, Result};
use crate::jwt::{ClaimSet, HttpKeySetSource, KeySet, KeySetStore, TokenVerifier, resolve};
use crate::rbac;

/// Bearer token authenticator
///
/// Cheap to clone; clones share the key set store.
///
/// # Example
///
/// ```rust,no_run
/// use tokengate_auth::{AuthConfig, Authenticator};
///
/// # tokio_test::block_on(async {
/// let config = AuthConfig::for_realm("http://localhost:8080", "myrealm", "react-client");
/// let authenticator = Authenticator::connect(&config).await?;
///
/// let claims = authenticator.authenticate("eyJhbGciOi...").await?;
/// let admin = authenticator.authorize(claims, "admin")?;
/// println!("admin {:?}", admin.preferred_username);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Authenticator {
    verifier: Arc<TokenVerifier>,
    keys: Arc<KeySetStore>,
}

impl Authenticator {
    /// Combine a verifier with an already loaded key set store
    pub fn new(verifier: TokenVerifier, keys: Arc<KeySetStore>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            keys,
        }
    }

    /// Validate `config`, fetch the initial key set over HTTP and build an authenticator
    ///
    /// Does not start background refreshing; see
    /// [`spawn_refresh_task`](Self::spawn_refresh_task).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid configuration, an insecure endpoint
    /// or a failed initial fetch.
    pub async fn connect(config: &AuthConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let verifier = TokenVerifier::new(config.verifier_config())?;

        let source = HttpKeySetSource::new(&config.key_set_endpoint, config.request_timeout())?;
        let keys = KeySetStore::load(Arc::new(source), config.refresh_policy()).await?;

        info!(
            issuer = %config.issuer,
            audience = %config.audience,
            jwks_uri = %config.key_set_endpoint,
            audience_policy = ?config.audience_policy,
            "Authenticator ready"
        );

        Ok(Self::new(verifier, Arc::new(keys)))
    }

    /// Verify a raw bearer token against the current key set
    ///
    /// If the token names a key the current snapshot lacks, the store is asked
    /// for a (rate limited) refresh and resolution is tried exactly once more.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`] except `Forbidden`.
    pub async fn authenticate(&self, raw_token: &str) -> Result<ClaimSet> {
        let snapshot = self.keys.current();

        let result = match self.authenticate_with(&snapshot, raw_token) {
            Err(AuthError::UnknownKeyId { kid }) => {
                debug!(kid = %kid, version = snapshot.version(), "Unknown kid, requesting key set refresh");
                if self.keys.refresh_for_unknown_key(snapshot.version()).await {
                    self.authenticate_with(&self.keys.current(), raw_token)
                } else {
                    Err(AuthError::UnknownKeyId { kid })
                }
            }
            other => other,
        };

        if let Err(e) = &result {
            warn!(rejection = %e.kind(), error = %e, "Bearer token rejected");
        }
        result
    }

    /// Verify a raw bearer token against a given snapshot, without refreshing
    ///
    /// # Errors
    ///
    /// Any [`AuthError`] except `Forbidden`.
    pub fn authenticate_with(&self, key_set: &KeySet, raw_token: &str) -> Result<ClaimSet> {
        let key = resolve(key_set, raw_token)?;
        self.verifier.verify(raw_token, &key)
    }

    /// Require `role` on verified claims
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] if the role is not granted.
    pub fn authorize(&self, claims: ClaimSet, required_role: &str) -> Result<ClaimSet> {
        rbac::require_role(claims, required_role)
    }

    /// Key set store
    pub fn keys(&self) -> &Arc<KeySetStore> {
        &self.keys
    }

    /// Token verifier
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Start refreshing the key set in the background
    pub fn spawn_refresh_task(&self) -> JoinHandle<()> {
        Arc::clone(&self.keys).spawn_refresh_task()
    }
}
