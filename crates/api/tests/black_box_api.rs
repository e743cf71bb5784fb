use std::collections::HashMap;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};

use warden_api::app::{
    build_admin_app, build_user_app,
    services::{AdminServices, UserServices},
};
use warden_auth::TokenCodec;
use warden_core::SystemClock;
use warden_infra::{
    AdminConfig, InMemoryRefreshTokenLedger, InMemoryUserDirectory, PasswordManager, PasswordParams,
    ServiceConfig, ServiceDefaults,
};

const SHARED_SECRET: &str = "black-box-shared-secret-0123456789abcdef";
const ADMIN_PASSWORD: &str = "admin-password-123";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: axum::Router) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn cheap_passwords() -> PasswordManager {
    PasswordManager::new(PasswordParams {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}

fn service_config(defaults: ServiceDefaults, extra: &[(&str, &str)]) -> ServiceConfig {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("WARDEN_HMAC_SECRET".into(), SHARED_SECRET.into());
    for (key, value) in extra {
        env.insert((*key).into(), (*value).into());
    }
    ServiceConfig::from_lookup(defaults, move |key: &str| env.get(key).cloned()).unwrap()
}

fn codec_for(config: &ServiceConfig) -> Arc<TokenCodec> {
    Arc::new(config.build_codec(Arc::new(SystemClock)).unwrap())
}

async fn spawn_user_service() -> TestServer {
    let config = service_config(ServiceDefaults::USER_SERVICE, &[]);
    let services = UserServices::new(
        &config,
        codec_for(&config),
        Arc::new(InMemoryRefreshTokenLedger::new()),
        Arc::new(InMemoryUserDirectory::new()),
        cheap_passwords(),
    );
    TestServer::spawn(build_user_app(services)).await
}

async fn spawn_admin_service(peer: &TestServer) -> TestServer {
    let config = service_config(ServiceDefaults::ADMIN_SERVICE, &[]);
    let hash = cheap_passwords().hash_password(ADMIN_PASSWORD).unwrap();
    let admin = AdminConfig::from_lookup(|key| match key {
        "WARDEN_ADMIN_PASSWORD_HASH" => Some(hash.clone()),
        "WARDEN_PEER_URL" => Some(peer.base_url.clone()),
        _ => None,
    })
    .unwrap();
    let services = AdminServices::new(&config, admin, Arc::new(SystemClock)).unwrap();
    TestServer::spawn(build_admin_app(services)).await
}

/// A token minted by a peer with the given service id.
fn s2s_token_from_admin(audience: &str) -> String {
    let config = service_config(ServiceDefaults::ADMIN_SERVICE, &[]);
    codec_for(&config).mint_s2s(vec![audience.to_string()]).unwrap().0
}

async fn signup(client: &reqwest::Client, server: &TestServer, username: &str) -> Value {
    let res = client
        .post(server.url("/auth/signup"))
        .json(&json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "correct horse battery",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn user_id(client: &reqwest::Client, server: &TestServer, access: &str) -> String {
    let me: Value = client
        .get(server.url("/users/me"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    me["subject"].as_str().unwrap().to_string()
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let server = spawn_user_service().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn signup_login_refresh_and_replay() {
    let server = spawn_user_service().await;
    let client = reqwest::Client::new();

    let tokens = signup(&client, &server, "alice").await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 900);
    let first_refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let me = client
        .get(server.url("/users/me"))
        .bearer_auth(tokens["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    let me: Value = me.json().await.unwrap();
    assert_eq!(me["roles"], json!(["USER"]));

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refresh_token": first_refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let rotated: Value = res.json().await.unwrap();
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    // The consumed token is now a replay.
    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refresh_token": first_refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "token_replayed");

    // The child still works.
    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refresh_token": rotated["refresh_token"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "alice", "password": "correct horse battery" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn signup_and_login_failures() {
    let server = spawn_user_service().await;
    let client = reqwest::Client::new();
    signup(&client, &server, "bob").await;

    let res = client
        .post(server.url("/auth/signup"))
        .json(&json!({ "username": "bob", "email": "bob@example.com", "password": "another password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(res).await, "username_taken");

    let res = client
        .post(server.url("/auth/signup"))
        .json(&json!({ "username": "carol", "email": "not-an-email", "password": "long enough" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "validation_error");

    for (username, password) in [("bob", "wrong password"), ("nobody", "correct horse battery")] {
        let res = client
            .post(server.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "invalid_credentials");
    }
}

#[tokio::test]
async fn authentication_gate_rejections() {
    let server = spawn_user_service().await;
    let client = reqwest::Client::new();
    let tokens = signup(&client, &server, "dave").await;

    let res = client.get(server.url("/users/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthorized");

    let res = client
        .get(server.url("/users/me"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "malformed");

    let res = client
        .get(server.url("/users/me"))
        .bearer_auth(tokens["refresh_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "wrong_token_type");

    // Signed with a key nobody here trusts.
    let rogue = service_config(
        ServiceDefaults::USER_SERVICE,
        &[("WARDEN_HMAC_SECRET", "rogue-secret-rogue-secret-rogue-secret")],
    );
    let (forged, _) = codec_for(&rogue)
        .mint_access("mallory", vec![warden_auth::Role::ADMIN], vec![])
        .unwrap();
    let res = client
        .get(server.url("/users/me"))
        .bearer_auth(forged)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "invalid_signature");

    // The scheme name is case-insensitive.
    let res = client
        .get(server.url("/users/me"))
        .header("Authorization", format!("bearer {}", tokens["access_token"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // A peer service is not a human principal outside the internal routes.
    let res = client
        .get(server.url("/users/me"))
        .bearer_auth(s2s_token_from_admin("user-service"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthorized");
}

#[tokio::test]
async fn internal_routes_require_s2s_token_for_this_service() {
    let server = spawn_user_service().await;
    let client = reqwest::Client::new();
    let tokens = signup(&client, &server, "erin").await;
    let access = tokens["access_token"].as_str().unwrap();
    let id = user_id(&client, &server, access).await;
    let path = format!("/internal/users/{id}");

    let res = client.get(server.url(&path)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // A human session is not a service credential.
    let res = client.get(server.url(&path)).bearer_auth(access).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "s2s_required");

    let res = client
        .get(server.url(&path))
        .bearer_auth(s2s_token_from_admin("billing-service"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "audience_mismatch");

    let res = client
        .get(server.url(&path))
        .bearer_auth(s2s_token_from_admin("user-service"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let summary: Value = res.json().await.unwrap();
    assert_eq!(summary["username"], "erin");
    assert_eq!(summary["active_sessions"], 1);
    assert!(summary.get("password_hash").is_none());
}

#[tokio::test]
async fn logout_revokes_refresh_tokens() {
    let server = spawn_user_service().await;
    let client = reqwest::Client::new();
    let tokens = signup(&client, &server, "frank").await;

    let res = client.post(server.url("/auth/logout")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(server.url("/auth/logout"))
        .bearer_auth(tokens["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refresh_token": tokens["refresh_token"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "token_replayed");
}

#[tokio::test]
async fn admin_proxies_through_s2s_boundary() {
    let users = spawn_user_service().await;
    let admin = spawn_admin_service(&users).await;
    let client = reqwest::Client::new();

    let tokens = signup(&client, &users, "grace").await;
    let user_access = tokens["access_token"].as_str().unwrap();
    let id = user_id(&client, &users, user_access).await;

    let res = client
        .post(admin.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(admin.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": ADMIN_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let login: Value = res.json().await.unwrap();
    assert!(login["refresh_token"].is_null());
    let admin_access = login["access_token"].as_str().unwrap().to_string();

    // USER role is not enough.
    let res = client
        .get(admin.url(&format!("/admin/users/{id}")))
        .bearer_auth(user_access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "forbidden");

    let res = client
        .get(admin.url(&format!("/admin/users/{id}")))
        .bearer_auth(&admin_access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let summary: Value = res.json().await.unwrap();
    assert_eq!(summary["username"], "grace");

    let res = client
        .get(admin.url("/admin/users/00000000-0000-0000-0000-000000000000"))
        .bearer_auth(&admin_access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(admin.url(&format!("/admin/users/{id}/revoke-sessions")))
        .bearer_auth(&admin_access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let revoked: Value = res.json().await.unwrap();
    assert_eq!(revoked["revoked"], 1);

    let res = client
        .post(users.url("/auth/refresh"))
        .json(&json!({ "refresh_token": tokens["refresh_token"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "token_replayed");
}

#[tokio::test]
async fn admin_reports_unreachable_peer_as_bad_gateway() {
    let config = service_config(ServiceDefaults::ADMIN_SERVICE, &[]);
    let hash = cheap_passwords().hash_password(ADMIN_PASSWORD).unwrap();
    let admin = AdminConfig::from_lookup(|key| match key {
        "WARDEN_ADMIN_PASSWORD_HASH" => Some(hash.clone()),
        "WARDEN_PEER_URL" => Some("http://127.0.0.1:1".to_string()),
        _ => None,
    })
    .unwrap();
    let server = TestServer::spawn(build_admin_app(
        AdminServices::new(&config, admin, Arc::new(SystemClock)).unwrap(),
    ))
    .await;
    let client = reqwest::Client::new();

    let login: Value = client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": ADMIN_PASSWORD }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let res = client
        .get(server.url("/admin/users/00000000-0000-0000-0000-000000000000"))
        .bearer_auth(login["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(res).await, "upstream_error");

    // Ids that are not user ids never reach the peer.
    for raw in ["not-a-uuid", "..%2F..%2Fhealth"] {
        let res = client
            .get(server.url(&format!("/admin/users/{raw}")))
            .bearer_auth(login["access_token"].as_str().unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{raw}");
        assert_eq!(error_code(res).await, "not_found");
    }
}
