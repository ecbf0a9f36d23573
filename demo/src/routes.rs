//! HTTP routes
//!
//! `/public` is open, `/protected` needs a valid bearer token and `/admin`
//! additionally needs the `admin` realm role.

use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use tokengate_auth::Authenticator;
use tokengate_auth::jwt::ClaimSet;
use tokengate_auth::tower::AuthLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(authenticator: Arc<Authenticator>, cors: CorsLayer) -> Router {
    let protected = Router::new()
        .route("/protected", get(protected))
        .route_layer(AuthLayer::from_arc(Arc::clone(&authenticator)));

    let admin = Router::new()
        .route("/admin", get(admin))
        .route_layer(AuthLayer::from_arc(authenticator).require_role("admin"));

    Router::new()
        .route("/public", get(public))
        .merge(protected)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn public() -> Json<Value> {
    Json(json!({ "message": "This is public" }))
}

async fn protected(Extension(claims): Extension<ClaimSet>) -> Json<Value> {
    Json(json!({
        "username": claims.preferred_username,
        "roles": claims.roles(),
    }))
}

async fn admin(Extension(claims): Extension<ClaimSet>) -> Json<Value> {
    tracing::info!(user = ?claims.preferred_username, "Admin access");
    Json(json!({ "message": "Welcome admin" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokengate_auth::jwt::{KeySetStore, RefreshPolicy, StaticKeySetSource, TokenVerifier, VerifierConfig};
    use tower::ServiceExt;

    const ISSUER: &str = "http://localhost:8080/realms/myrealm";
    const JWKS: &str = include_str!("../../crates/tokengate-auth/tests/fixtures/jwks.json");
    const RSA_PEM: &[u8] = include_bytes!("../../crates/tokengate-auth/tests/fixtures/rsa-primary.pem");

    async fn app() -> Router {
        let source = Arc::new(StaticKeySetSource::from_json(JWKS).unwrap());
        let keys = KeySetStore::load(source, RefreshPolicy::default()).await.unwrap();
        let verifier = TokenVerifier::new(VerifierConfig::new(ISSUER, "react-client")).unwrap();
        router(
            Arc::new(Authenticator::new(verifier, Arc::new(keys))),
            CorsLayer::new(),
        )
    }

    fn token(roles: &[&str]) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("primary".to_string());
        encode(
            &header,
            &json!({
                "sub": "user-1",
                "iss": ISSUER,
                "aud": ["account"],
                "azp": "react-client",
                "exp": now + 300,
                "preferred_username": "alice",
                "realm_access": { "roles": roles },
            }),
            &EncodingKey::from_rsa_pem(RSA_PEM).unwrap(),
        )
        .unwrap()
    }

    async fn get_json(app: Router, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(path);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_public_needs_no_token() {
        let (status, body) = get_json(app().await, "/public", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "This is public" }));
    }

    #[tokio::test]
    async fn test_protected_returns_identity() {
        let (status, body) = get_json(app().await, "/protected", Some(&token(&["user"]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "username": "alice", "roles": ["user"] }));
    }

    #[tokio::test]
    async fn test_protected_without_token() {
        let (status, body) = get_json(app().await, "/protected", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Not authenticated");
    }

    #[tokio::test]
    async fn test_admin_requires_role() {
        let (status, body) = get_json(app().await, "/admin", Some(&token(&["user"]))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Forbidden");

        let (status, body) = get_json(app().await, "/admin", Some(&token(&["admin"]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome admin");
    }
}
