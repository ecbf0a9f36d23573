//! Tower Service implementation for authentication
//!
//! [`AuthService`] implements `Service<http::Request<B>>`:
//!
//! - extracts the token from the `Authorization` header (`Bearer` scheme,
//!   matched case-insensitively)
//! - authenticates it, and checks the required role if one is configured
//! - on success inserts the [`ClaimSet`] into the request's extensions and
//!   forwards to the inner service
//! - on failure answers itself; the inner service is never called

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tower_service::Service;
use tracing::debug;

use crate::error::AuthError;
use crate::Authenticator;

use super::AuthLayerConfig;

/// Tower Service that performs authentication
///
/// # Type Parameters
///
/// * `S` - The inner service type
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    /// Create a new auth service
    pub fn new(inner: S, authenticator: Arc<Authenticator>, config: AuthLayerConfig) -> Self {
        Self {
            inner,
            authenticator,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Bearer token from `header`, if present and well formed
fn extract_bearer(headers: &HeaderMap, header: &str) -> Option<String> {
    let value = headers.get(header)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn json_response<ResBody>(
    status: StatusCode,
    detail: &str,
    challenge: Option<&'static str>,
) -> http::Response<ResBody>
where
    ResBody: From<String>,
{
    let body = serde_json::json!({ "detail": detail }).to_string();
    let mut response = http::Response::new(ResBody::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(challenge) = challenge {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }
    response
}

fn missing_credentials<ResBody: From<String>>() -> http::Response<ResBody> {
    json_response(StatusCode::UNAUTHORIZED, "Not authenticated", Some("Bearer"))
}

fn rejection<ResBody: From<String>>(error: &AuthError) -> http::Response<ResBody> {
    let status = error.status_code();
    let challenge = (status == StatusCode::UNAUTHORIZED).then_some(r#"Bearer error="invalid_token""#);
    json_response(status, error.public_message(), challenge)
}

/// Future type for auth service responses
pub type AuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let Some(token) = extract_bearer(req.headers(), &self.config.auth_header) else {
            debug!(path = %req.uri().path(), "Request without bearer token");
            return Box::pin(async move { Ok(missing_credentials()) });
        };

        let authenticator = Arc::clone(&self.authenticator);
        let required_role = self.config.required_role.clone();

        Box::pin(async move {
            let verified = authenticator
                .authenticate(&token)
                .await
                .and_then(|claims| match &required_role {
                    Some(role) => authenticator.authorize(claims, role),
                    None => Ok(claims),
                });

            match verified {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(e) => Ok(rejection(&e)),
            }
        })
    }
}
