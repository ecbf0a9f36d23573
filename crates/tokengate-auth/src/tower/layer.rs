//! Tower Layer implementation for authentication

use std::sync::Arc;
use tower::Layer;

use crate::Authenticator;

use super::AuthLayerConfig;
use super::service::AuthService;

/// Tower Layer that adds bearer token authentication to services
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use tokengate_auth::tower::AuthLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(AuthLayer::new(authenticator))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
    config: AuthLayerConfig,
}

impl AuthLayer {
    /// Create a new auth layer with default configuration
    pub fn new(authenticator: Authenticator) -> Self {
        Self::from_arc(Arc::new(authenticator))
    }

    /// Create a new auth layer with custom configuration
    pub fn with_config(authenticator: Authenticator, config: AuthLayerConfig) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            config,
        }
    }

    /// Create a new auth layer from a shared authenticator
    pub fn from_arc(authenticator: Arc<Authenticator>) -> Self {
        Self {
            authenticator,
            config: AuthLayerConfig::default(),
        }
    }

    /// Require a realm role on every request
    #[must_use]
    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.config.required_role = Some(role.into());
        self
    }

    /// Let requests for `path` through without a token
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }

    /// Layer configuration
    pub fn config(&self) -> &AuthLayerConfig {
        &self.config
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService::new(inner, Arc::clone(&self.authenticator), self.config.clone())
    }
}
