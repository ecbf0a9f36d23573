//! Configuration types
//!
//! [`AuthConfig`] is the single, immutable description of what a token must
//! look like to be accepted and where the provider's keys live. It is loaded
//! once (file and/or `TOKENGATE__*` environment variables) and handed to
//! [`Authenticator`](crate::Authenticator) at construction.

use std::path::Path;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::jwt::{RefreshPolicy, VerifierConfig};

/// Environment variable prefix (`TOKENGATE__ISSUER`, `TOKENGATE__CLIENT_ID`, ...)
pub const ENV_PREFIX: &str = "TOKENGATE";

/// How the audience check treats the `azp` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudiencePolicy {
    /// Only `aud` may name the expected audience
    Strict,
    /// Also accept a token whose `azp` equals the expected audience
    ///
    /// Public clients of some providers (Keycloak among them) receive access
    /// tokens whose `aud` names other services while `azp` names the client.
    #[default]
    AllowAuthorizedParty,
}

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected issuer (`iss`), compared byte for byte
    pub issuer: String,
    /// Expected audience - the client id of this application
    #[serde(alias = "client_id")]
    pub audience: String,
    /// Signature algorithms accepted (asymmetric only)
    #[serde(default = "default_algorithms")]
    pub accepted_algorithms: Vec<Algorithm>,
    /// JWKS endpoint of the provider
    pub key_set_endpoint: String,
    /// Clock skew allowance for `exp` / `nbf`, in seconds
    #[serde(default)]
    pub leeway_secs: u64,
    /// Audience acceptance policy
    #[serde(default)]
    pub audience_policy: AudiencePolicy,
    /// Refetch the key set once it is older than this many seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Never refetch more often than this many seconds
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval_secs: u64,
    /// Timeout of a single JWKS request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_refresh_interval() -> u64 {
    600
}

fn default_min_refresh_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

impl AuthConfig {
    /// Create a configuration with default algorithms and refresh settings
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        key_set_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            accepted_algorithms: default_algorithms(),
            key_set_endpoint: key_set_endpoint.into(),
            leeway_secs: 0,
            audience_policy: AudiencePolicy::default(),
            refresh_interval_secs: default_refresh_interval(),
            min_refresh_interval_secs: default_min_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Configuration for a Keycloak realm
    ///
    /// Issuer is `{base_url}/realms/{realm}` and keys are served from
    /// `{issuer}/protocol/openid-connect/certs`.
    ///
    /// ```rust
    /// use tokengate_auth::AuthConfig;
    ///
    /// let config = AuthConfig::for_realm("http://localhost:8080", "myrealm", "react-client");
    /// assert_eq!(config.issuer, "http://localhost:8080/realms/myrealm");
    /// assert_eq!(
    ///     config.key_set_endpoint,
    ///     "http://localhost:8080/realms/myrealm/protocol/openid-connect/certs"
    /// );
    /// ```
    pub fn for_realm(base_url: &str, realm: &str, client_id: impl Into<String>) -> Self {
        let issuer = format!("{}/realms/{realm}", base_url.trim_end_matches('/'));
        let endpoint = format!("{issuer}/protocol/openid-connect/certs");
        Self::new(issuer, client_id, endpoint)
    }

    /// Load from an optional file, overlaid with `TOKENGATE__*` environment variables
    ///
    /// The file format follows its extension (`.toml`, `.json`, `.yaml`).
    /// `TOKENGATE__ACCEPTED_ALGORITHMS` takes a comma separated list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be read or a required
    /// option is missing, or any error from [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, environment())
    }

    fn load_from(path: Option<&Path>, env: config::Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let loaded: Self = builder.add_source(env).build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Set accepted algorithms
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.accepted_algorithms = algorithms;
        self
    }

    /// Set the clock skew allowance
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway_secs = leeway.as_secs();
        self
    }

    /// Set the audience policy
    #[must_use]
    pub fn with_audience_policy(mut self, policy: AudiencePolicy) -> Self {
        self.audience_policy = policy;
        self
    }

    /// Check option constraints
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Empty`] for an empty issuer or audience
    /// - [`ConfigError::NoAlgorithms`] / [`ConfigError::SymmetricAlgorithm`]
    /// - [`ConfigError::InvalidEndpoint`] if the endpoint is not an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.verifier_config().validate()?;

        let endpoint = url::Url::parse(&self.key_set_endpoint).map_err(|e| {
            ConfigError::InvalidEndpoint {
                endpoint: self.key_set_endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.key_set_endpoint.clone(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        Ok(())
    }

    /// Verifier settings derived from this configuration
    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig::new(self.issuer.clone(), self.audience.clone())
            .with_algorithms(self.accepted_algorithms.clone())
            .with_leeway(Duration::from_secs(self.leeway_secs))
            .with_audience_policy(self.audience_policy)
    }

    /// Key set refresh settings derived from this configuration
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            min_refresh_interval: Duration::from_secs(self.min_refresh_interval_secs),
        }
    }

    /// JWKS request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("accepted_algorithms")
}
