//! Common test utilities for integration tests
//!
//! Shared fixtures (test keys under `tests/fixtures`), token minting, claim
//! builders and a mock identity provider serving the key set.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokengate_auth::jwt::{
    KeySetStore, RefreshPolicy, StaticKeySetSource, TokenVerifier, VerifierConfig,
};
use tokengate_auth::{AudiencePolicy, Authenticator};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const ISSUER: &str = "http://localhost:8080/realms/myrealm";
pub const CLIENT_ID: &str = "react-client";
pub const CERTS_PATH: &str = "/realms/myrealm/protocol/openid-connect/certs";

pub const RSA_PRIMARY_PEM: &[u8] = include_bytes!("../fixtures/rsa-primary.pem");
pub const RSA_SECONDARY_PEM: &[u8] = include_bytes!("../fixtures/rsa-secondary.pem");
pub const EC_P256_PEM: &[u8] = include_bytes!("../fixtures/ec-p256.pem");

/// Key set with `primary` (RSA) and `ec-primary` (P-256)
pub const JWKS: &str = include_str!("../fixtures/jwks.json");
/// Key set with only `secondary` (RSA)
pub const JWKS_SECONDARY: &str = include_str!("../fixtures/jwks-secondary.json");

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

pub fn jwks_json() -> Value {
    serde_json::from_str(JWKS).expect("Invalid fixture JWKS")
}

/// Both fixture key sets merged: `primary`, `ec-primary`, `secondary`
pub fn rotated_jwks_json() -> Value {
    let mut merged = jwks_json();
    let secondary: Value = serde_json::from_str(JWKS_SECONDARY).expect("Invalid fixture JWKS");
    merged["keys"]
        .as_array_mut()
        .expect("keys array")
        .push(secondary["keys"][0].clone());
    merged
}

/// Keycloak-shaped access token claims, valid for five minutes
pub fn access_claims(aud: Value, azp: Option<&str>, roles: &[&str]) -> Value {
    let now = current_timestamp();
    let mut claims = json!({
        "sub": "9f1c4d2e-user",
        "iss": ISSUER,
        "aud": aud,
        "exp": now + 300,
        "iat": now,
        "typ": "Bearer",
        "preferred_username": "alice",
        "realm_access": { "roles": roles },
    });
    if let Some(azp) = azp {
        claims["azp"] = json!(azp);
    }
    claims
}

/// Claims accepted by the primary audience rule
pub fn valid_claims() -> Value {
    access_claims(json!(CLIENT_ID), None, &["user"])
}

/// Sign `claims` with the fixture key matching `alg`
pub fn mint_token(claims: &Value, kid: Option<&str>, alg: Algorithm) -> String {
    let key = match alg {
        Algorithm::ES256 => EncodingKey::from_ec_pem(EC_P256_PEM).expect("Invalid EC key"),
        _ => EncodingKey::from_rsa_pem(RSA_PRIMARY_PEM).expect("Invalid RSA key"),
    };
    mint_with_key(claims, kid, alg, &key)
}

/// Sign `claims` with the secondary RSA key
pub fn mint_secondary(claims: &Value, kid: &str) -> String {
    let key = EncodingKey::from_rsa_pem(RSA_SECONDARY_PEM).expect("Invalid RSA key");
    mint_with_key(claims, Some(kid), Algorithm::RS256, &key)
}

pub fn mint_with_key(claims: &Value, kid: Option<&str>, alg: Algorithm, key: &EncodingKey) -> String {
    let mut header = Header::new(alg);
    header.typ = Some("JWT".to_string());
    header.kid = kid.map(str::to_string);
    encode(&header, claims, key).expect("Failed to encode test JWT")
}

pub fn verifier(policy: AudiencePolicy) -> TokenVerifier {
    TokenVerifier::new(
        VerifierConfig::new(ISSUER, CLIENT_ID)
            .with_algorithms(vec![Algorithm::RS256, Algorithm::ES256])
            .with_audience_policy(policy),
    )
    .expect("Invalid verifier config")
}

/// Authenticator over the fixture key set; the source is returned for rotation
pub async fn static_authenticator(
    policy: RefreshPolicy,
) -> (Authenticator, Arc<StaticKeySetSource>) {
    let source = Arc::new(StaticKeySetSource::from_json(JWKS).expect("Invalid fixture JWKS"));
    let keys = KeySetStore::load(source.clone(), policy)
        .await
        .expect("Failed to load key set");
    (
        Authenticator::new(verifier(AudiencePolicy::AllowAuthorizedParty), Arc::new(keys)),
        source,
    )
}

/// Policy without rate limiting, for tests that refresh on demand
pub fn eager_refresh() -> RefreshPolicy {
    RefreshPolicy {
        refresh_interval: Duration::from_secs(600),
        min_refresh_interval: Duration::ZERO,
    }
}

/// Mock identity provider serving the realm's certs endpoint
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub base_url: String,
    pub jwks_endpoint: String,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            jwks_endpoint: format!("{base_url}{CERTS_PATH}"),
            base_url,
            server,
        }
    }

    /// Serve `jwks` for all subsequent requests
    pub async fn mock_jwks(&self, jwks: Value) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&self.server)
            .await;
    }

    /// Serve `jwks` for the next `times` requests only
    pub async fn mock_jwks_times(&self, jwks: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answer with `status` for all subsequent requests
    pub async fn mock_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of key set requests received so far
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.iter().filter(|r| r.url.path() == CERTS_PATH).count())
            .unwrap_or(0)
    }

    pub async fn reset(&self) {
        self.server.reset().await;
    }
}
