//! # Tokengate Auth - Bearer Token Verification
//!
//! Verification of access tokens issued by an OpenID Connect identity provider
//! (Keycloak and friends) against the provider's published key set, with a
//! role check on top.
//!
//! ## Design Principles
//!
//! - **Key resolution by `kid` only**: the unverified header picks a key, never an algorithm
//! - **Two-step verification**: signature/expiry/issuer first, audience second
//! - **Coarse public errors**: detailed context goes to logs, not to clients
//! - **Immutable configuration**: passed at construction, no globals
//!
//! ## Architecture
//!
//! - [`jwt`] - claims, key resolution, verification and the key set store
//!   - `keys` - key set snapshot and [`resolve`](jwt::resolve)
//!   - `validator` - [`TokenVerifier`](jwt::TokenVerifier)
//!   - `jwks` - key set sources and [`KeySetStore`](jwt::KeySetStore)
//! - [`rbac`] - role checks on verified claims
//! - [`config`] - [`AuthConfig`], loaded from file and environment
//! - [`authenticator`] - [`Authenticator`], the request-facing entry point
//! - `tower` - Tower middleware (feature `middleware`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokengate_auth::{AuthConfig, Authenticator};
//!
//! # tokio_test::block_on(async {
//! let config = AuthConfig::for_realm("http://localhost:8080", "myrealm", "react-client");
//! let authenticator = Authenticator::connect(&config).await?;
//! let _refresh = authenticator.spawn_refresh_task();
//!
//! match authenticator.authenticate("eyJhbGciOi...").await {
//!     Ok(claims) => println!("hello {:?}, roles {:?}", claims.preferred_username, claims.roles()),
//!     Err(e) => println!("{} ({})", e.public_message(), e.status_code()),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` (default) - Tower [`AuthLayer`](crate::tower::AuthLayer)
//!
//! ## Standards Compliance
//!
//! - **RFC 7515** - JSON Web Signature (JWS)
//! - **RFC 7517** - JSON Web Key (JWK)
//! - **RFC 7519** - JSON Web Token (JWT)
//! - **RFC 6750** - Bearer Token Usage

// Submodules
pub mod authenticator;
pub mod config;
pub mod error;
pub mod jwt;
pub mod rbac;

#[cfg(feature = "middleware")]
pub mod tower;

#[doc(inline)]
pub use authenticator::Authenticator;

#[doc(inline)]
pub use config::{AudiencePolicy, AuthConfig};

#[doc(inline)]
pub use error::{AuthError, ConfigError, JwksError, RejectionKind, Result};
