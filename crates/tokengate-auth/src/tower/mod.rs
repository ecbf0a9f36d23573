//! # Tower Middleware Integration
//!
//! [`AuthLayer`] wraps any `http::Request` service (axum routers included) with
//! bearer token authentication backed by an [`Authenticator`](crate::Authenticator).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tokengate_auth::tower::{AuthLayer, AuthLayerConfig};
//!
//! let service = ServiceBuilder::new()
//!     .layer(AuthLayer::new(authenticator).require_role("admin"))
//!     .service(my_http_handler);
//! ```
//!
//! ## Responses
//!
//! - no or unparsable `Authorization` header: `401`, `WWW-Authenticate: Bearer`
//! - rejected token: the error's [`status_code`](crate::AuthError::status_code)
//!   with a JSON body `{"detail": <public message>}`
//! - missing required role: `403`
//!
//! ## Request Extensions
//!
//! On success the verified [`ClaimSet`](crate::jwt::ClaimSet) is inserted into
//! the request's extensions:
//!
//! ```rust,ignore
//! if let Some(claims) = req.extensions().get::<ClaimSet>() {
//!     println!("Authenticated user: {:?}", claims.preferred_username);
//! }
//! ```

mod layer;
mod service;

pub use layer::AuthLayer;
pub use service::{AuthService, AuthServiceFuture};

/// Configuration for the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLayerConfig {
    /// Header name to extract the token from (default: "Authorization")
    pub auth_header: String,
    /// Realm role every request must carry
    pub required_role: Option<String>,
    /// Paths that bypass authentication
    pub bypass_paths: Vec<String>,
}

impl Default for AuthLayerConfig {
    fn default() -> Self {
        Self {
            auth_header: "Authorization".to_string(),
            required_role: None,
            bypass_paths: Vec::new(),
        }
    }
}

impl AuthLayerConfig {
    /// Config requiring `role` on top of a valid token
    #[must_use]
    pub fn with_required_role(role: impl Into<String>) -> Self {
        Self {
            required_role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Add a path to the bypass list
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Set the authorization header name
    #[must_use]
    pub fn auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    /// Check if a path should bypass authentication
    #[must_use]
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}
