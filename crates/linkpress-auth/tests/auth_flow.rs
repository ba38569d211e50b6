//! End-to-end tests for the login, refresh, and resolve flow against a
//! mocked provider, with real signed identity tokens.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use linkpress_auth::config::{IdentitySource, ProviderConfig};
use linkpress_auth::credentials::CredentialManager;
use linkpress_auth::flow::AuthFlowController;
use linkpress_auth::http::{router, AuthState};
use linkpress_auth::jwks::{KeyRingCache, KeyRingCacheConfig};
use linkpress_auth::provider::ProviderClient;
use linkpress_auth::refresh::RefreshOrchestrator;
use linkpress_auth::resolver::IdentityResolver;
use linkpress_auth::storage::memory::{MemoryCredentialStore, MemoryUserStore};
use linkpress_auth::storage::{CredentialStore, UserStore};
use linkpress_auth::vault::CredentialVault;
use linkpress_auth::verifier::IdTokenVerifier;
use linkpress_auth::RetryPolicy;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KID: &str = "rotation-2026-01";

/// RSA signing key with its public JWK form.
struct SigningKey {
    encoding_key: EncodingKey,
    jwk: serde_json::Value,
}

impl SigningKey {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = private.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();

        Self {
            encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
            jwk: serde_json::json!({
                "kty": "RSA",
                "kid": KID,
                "use": "sig",
                "alg": "RS256",
                "n": URL_SAFE_NO_PAD.encode(private.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(private.e().to_bytes_be()),
            }),
        }
    }

    fn id_token(&self, sub: &str, email: &str, exp_offset_secs: i64) -> String {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = serde_json::json!({
            "iss": "https://www.linkedin.com/oauth",
            "sub": sub,
            "aud": "client-id",
            "exp": now + exp_offset_secs,
            "iat": now,
            "email": email,
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).unwrap()
    }
}

struct TestApp {
    router: axum::Router,
    users: Arc<MemoryUserStore>,
    credentials: Arc<CredentialManager>,
}

async fn test_app(server: &MockServer, source: IdentitySource) -> TestApp {
    let users = Arc::new(MemoryUserStore::new());
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>,
        Arc::new(CredentialVault::new(&[7u8; 32]).unwrap()),
    ));

    let config = ProviderConfig::new("client-id", "client-secret", "http://localhost/cb")
        .with_token_url(Url::parse(&format!("{}/oauth/v2/accessToken", server.uri())).unwrap())
        .with_userinfo_url(Url::parse(&format!("{}/v2/userinfo", server.uri())).unwrap())
        .with_jwks_url(Url::parse(&format!("{}/oauth/openid/jwks", server.uri())).unwrap())
        .with_identity_source(source);
    let key_ring = Arc::new(KeyRingCache::new(
        config.jwks_url.clone(),
        KeyRingCacheConfig::default(),
    ));
    let provider = Arc::new(
        ProviderClient::new(config)
            .with_retry_policy(RetryPolicy::default().with_backoff(Duration::ZERO)),
    );
    let verifier = Arc::new(IdTokenVerifier::new(Arc::clone(&key_ring)));

    let flow = Arc::new(AuthFlowController::new(
        Arc::clone(&provider),
        Arc::clone(&users) as Arc<dyn UserStore>,
        Arc::clone(&credentials),
        Arc::clone(&verifier),
    ));
    let refresher = Arc::new(RefreshOrchestrator::new(
        Arc::clone(&credentials),
        Arc::clone(&provider),
    ));
    let resolver = Arc::new(IdentityResolver::new(
        Arc::clone(&users) as Arc<dyn UserStore>,
        Arc::clone(&credentials),
        provider,
        verifier,
    ));

    TestApp {
        router: router(AuthState {
            flow,
            refresher,
            resolver,
        }),
        users,
        credentials,
    }
}

async fn mount_jwks(server: &MockServer, key: &SigningKey) {
    Mock::given(method("GET"))
        .and(path("/oauth/openid/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "keys": [key.jwk] })),
        )
        .mount(server)
        .await;
}

async fn get(router: &axum::Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(router: &axum::Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn state_from_location(response: &axum::response::Response) -> String {
    let location = response.headers()["location"].to_str().unwrap();
    let url = Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn test_login_callback_resolve_round_trip() {
    let key = SigningKey::generate();
    let server = MockServer::start().await;
    mount_jwks(&server, &key).await;

    let id_token = key.id_token("AbC123xyZ", "member@example.com", 300);
    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "AQXdLV",
            "expires_in": 5184000,
            "refresh_token": "AQWrTV",
            "id_token": id_token,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = test_app(&server, IdentitySource::VerifiedIdToken).await;

    // Login issues the redirect and the state.
    let login = get(&app.router, "/auth/provider/login").await;
    assert_eq!(login.status(), StatusCode::TEMPORARY_REDIRECT);
    let state = state_from_location(&login);

    // Callback exchanges the code and stores the sealed credential.
    let callback = get(
        &app.router,
        &format!("/auth/provider/callback?code=auth-code-1&state={state}"),
    )
    .await;
    assert_eq!(callback.status(), StatusCode::OK);
    let body = body_json(callback).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["has_id_token"], true);
    assert_eq!(body["member_id"], "AbC123xyZ");
    let user_id = body["user_id"].as_i64().unwrap();

    // The account is keyed by the token's email claim.
    let user = app
        .users
        .get_user_by_email("member@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.id, user_id);
    assert_eq!(user.member_id.as_deref(), Some("AbC123xyZ"));

    // Resolve uses the stored identity token and reports the author URN.
    let resolve = get(
        &app.router,
        &format!("/auth/provider/resolve/{user_id}"),
    )
    .await;
    assert_eq!(resolve.status(), StatusCode::OK);
    let body = body_json(resolve).await;
    assert_eq!(body["member_id"], "AbC123xyZ");
    assert_eq!(body["author_urn"], "urn:li:member:AbC123xyZ");
    assert_eq!(body["source"], "id_token");

    // Replaying the consumed state fails.
    let replay = get(
        &app.router,
        &format!("/auth/provider/callback?code=auth-code-2&state={state}"),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expired_stored_id_token_falls_back_to_userinfo() {
    let key = SigningKey::generate();
    let server = MockServer::start().await;
    mount_jwks(&server, &key).await;
    Mock::given(method("GET"))
        .and(path("/v2/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": "AbC123xyZ",
        })))
        .expect(1)
        .mount(&server)
        .await;

    // A token that expired an hour ago, as stored by a long-past login.
    let id_token = key.id_token("AbC123xyZ", "member@example.com", -3600);

    let app = test_app(&server, IdentitySource::VerifiedIdToken).await;
    let user = app.users.upsert_by_email("member@example.com").await.unwrap();
    app.credentials
        .store_grant(
            user.id,
            &linkpress_auth::TokenGrant {
                access_token: "AQXdLV".to_string(),
                expires_in: Some(5_184_000),
                refresh_token: None,
                refresh_token_expires_in: None,
                id_token: Some(id_token),
                scope: None,
            },
        )
        .await
        .unwrap();

    // The expired token does not vouch for the identity; the live userinfo
    // call does.
    let resolve = get(&app.router, &format!("/auth/provider/resolve/{}", user.id)).await;
    assert_eq!(resolve.status(), StatusCode::OK);
    let body = body_json(resolve).await;
    assert_eq!(body["member_id"], "AbC123xyZ");
    assert_eq!(body["source"], "userinfo");
}

#[tokio::test]
async fn test_expired_stored_id_token_alone_never_resolves() {
    let key = SigningKey::generate();
    let server = MockServer::start().await;
    mount_jwks(&server, &key).await;
    // Userinfo is down, so nothing can vouch for the identity.
    Mock::given(method("GET"))
        .and(path("/v2/userinfo"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let id_token = key.id_token("AbC123xyZ", "member@example.com", -3600);

    let app = test_app(&server, IdentitySource::VerifiedIdToken).await;
    let user = app.users.upsert_by_email("member@example.com").await.unwrap();
    app.credentials
        .store_grant(
            user.id,
            &linkpress_auth::TokenGrant {
                access_token: "AQXdLV".to_string(),
                expires_in: Some(5_184_000),
                refresh_token: None,
                refresh_token_expires_in: None,
                id_token: Some(id_token),
                scope: None,
            },
        )
        .await
        .unwrap();

    let resolve = get(&app.router, &format!("/auth/provider/resolve/{}", user.id)).await;
    assert_eq!(resolve.status(), StatusCode::BAD_GATEWAY);

    // No member mapping was written on the strength of the expired token.
    let user = app.users.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(user.member_id, None);
}

#[tokio::test]
async fn test_refresh_endpoint_exchanges_expiring_credential() {
    let key = SigningKey::generate();
    let server = MockServer::start().await;
    mount_jwks(&server, &key).await;

    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=AQWrTV"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "AQNewTok",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = test_app(&server, IdentitySource::VerifiedIdToken).await;
    let user = app.users.upsert_by_email("member@example.com").await.unwrap();
    // Expiring in 60 seconds, well inside the 5-minute skew.
    app.credentials
        .store_grant(
            user.id,
            &linkpress_auth::TokenGrant {
                access_token: "AQXdLV".to_string(),
                expires_in: Some(60),
                refresh_token: Some("AQWrTV".to_string()),
                refresh_token_expires_in: None,
                id_token: None,
                scope: None,
            },
        )
        .await
        .unwrap();

    let refresh = post(&app.router, &format!("/auth/provider/refresh/{}", user.id)).await;
    assert_eq!(refresh.status(), StatusCode::OK);
    let body = body_json(refresh).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["refreshed"], true);
    assert!(body["expires_in"].as_i64().unwrap() > 3000);
    // The raw token value is never in the response.
    assert!(!body.to_string().contains("AQNewTok"));

    // The refreshed credential is now fresh; a second call does nothing.
    let refresh = post(&app.router, &format!("/auth/provider/refresh/{}", user.id)).await;
    let body = body_json(refresh).await;
    assert_eq!(body["refreshed"], false);

    let credentials = app.credentials.latest(user.id).await.unwrap().unwrap();
    assert_eq!(credentials.access_token, "AQNewTok");
    assert_eq!(credentials.refresh_token.as_deref(), Some("AQWrTV"));
}

#[tokio::test]
async fn test_stale_member_mapping_blocks_resolution() {
    let key = SigningKey::generate();
    let server = MockServer::start().await;
    mount_jwks(&server, &key).await;

    // The stored identity token belongs to a different remote account than
    // the one persisted for the user.
    let id_token = key.id_token("NewAccount", "member@example.com", 300);

    let app = test_app(&server, IdentitySource::VerifiedIdToken).await;
    let user = app.users.upsert_by_email("member@example.com").await.unwrap();
    app.users
        .set_member_id_if_absent(user.id, "OldAccount")
        .await
        .unwrap();
    app.credentials
        .store_grant(
            user.id,
            &linkpress_auth::TokenGrant {
                access_token: "AQXdLV".to_string(),
                expires_in: Some(5_184_000),
                refresh_token: None,
                refresh_token_expires_in: None,
                id_token: Some(id_token),
                scope: None,
            },
        )
        .await
        .unwrap();

    let resolve = get(&app.router, &format!("/auth/provider/resolve/{}", user.id)).await;
    assert_eq!(resolve.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resolve).await;
    assert_eq!(body["details"]["category"], "identity");

    // The stored mapping is untouched.
    let user = app.users.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(user.member_id.as_deref(), Some("OldAccount"));
}
