mod common;

use phonegate::store::UserStore;
use serde_json::{json, Value};

use common::{spawn_app, PHONE};

async fn login_tokens(app: &common::TestApp) -> Value {
    let response = app.login(PHONE).await;
    assert_eq!(200, response.status().as_u16());
    response.json().await.expect("Failed to parse response")
}

fn refresh_token_of(body: &Value) -> String {
    body["refreshToken"].as_str().unwrap().to_string()
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    body["code"].as_str().unwrap().to_string()
}

// --- Login ---

#[tokio::test]
async fn login_returns_tokens_and_public_identity() {
    let app = spawn_app();
    app.onboard(PHONE).await;

    let body = login_tokens(&app).await;

    assert!(body["accessToken"].as_str().is_some());
    assert_eq!(body["expiresIn"], 900);
    let refresh_token = refresh_token_of(&body);
    let (token_id, secret) = refresh_token.split_once('.').unwrap();
    assert_eq!(token_id.len(), 16);
    assert_eq!(secret.len(), 96);

    let user = &body["user"];
    assert_eq!(user["phone"], PHONE);
    assert_eq!(user["roles"], json!(["user"]));
    assert_eq!(user["verification"]["status"], "verified");
    assert_eq!(user["devices"][0]["deviceId"], "pixel-7");
    assert!(user["verification"].get("rawResponse").is_none());
    assert!(user["verification"].get("correlationToken").is_none());
    assert!(!body.to_string().contains("refreshTokenHash"));
}

#[tokio::test]
async fn login_records_device_and_client_metadata() {
    let app = spawn_app();
    app.onboard(PHONE).await;

    let response = app
        .client
        .post(&format!("{}/api/auth/login", app.address))
        .header("User-Agent", "phonegate-tests/1.0")
        .json(&json!({ "phone": PHONE, "deviceId": "iphone-15", "deviceInfo": { "platform": "ios" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
    app.login(PHONE).await;

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert!(user.last_login_at.is_some());
    assert_eq!(user.devices.len(), 2);

    let sessions = app.store.sessions_for_user(user.id).unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .any(|s| s.user_agent.as_deref() == Some("phonegate-tests/1.0")
            && s.device_id.as_deref() == Some("iphone-15")));
    assert!(sessions.iter().all(|s| s.ip.is_some()));
}

#[tokio::test]
async fn login_returns_401_for_unverified_phone() {
    let app = spawn_app();
    app.init(PHONE).await;

    let response = app.login(PHONE).await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "phone_not_verified");
}

#[tokio::test]
async fn login_returns_404_for_unknown_phone() {
    let app = spawn_app();

    let response = app.login(PHONE).await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn login_returns_400_for_malformed_input() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let test_cases = vec![
        (json!({ "phone": "" }), "empty phone"),
        (json!({ "phone": PHONE, "deviceId": "has spaces" }), "bad device id"),
        (
            json!({ "phone": PHONE, "deviceInfo": { "platform": "symbian" } }),
            "unknown platform",
        ),
    ];

    for (body, description) in test_cases {
        let response = app.post_json("/api/auth/login", &body).await;
        assert_eq!(400, response.status().as_u16(), "{}", description);
    }
}

// --- Refresh / Logout ---

#[tokio::test]
async fn refresh_token_lifecycle_end_to_end() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let t0 = refresh_token_of(&login_tokens(&app).await);

    let response = app.refresh(&t0).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["accessToken"].as_str().is_some());
    assert_eq!(body["expiresIn"], 900);
    let t1 = refresh_token_of(&body);
    assert_ne!(t0, t1);

    // T0 is single-use
    let response = app.refresh(&t0).await;
    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "invalid_refresh");

    let response = app.logout(&t1).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true }));

    let response = app.refresh(&t1).await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn wrong_secret_revokes_the_session() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let t0 = refresh_token_of(&login_tokens(&app).await);
    let token_id = t0.split_once('.').unwrap().0;
    let forged = format!("{}.{}", token_id, "ab".repeat(48));

    let response = app.refresh(&forged).await;
    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "invalid_refresh");

    // The genuine token no longer works either
    let response = app.refresh(&t0).await;
    assert!(response.status().is_client_error());
    assert_ne!(200, response.status().as_u16());

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    let sessions = app.store.sessions_for_user(user.id).unwrap();
    assert!(sessions.iter().all(|s| s.revoked_at.is_some()));
}

#[tokio::test]
async fn refresh_returns_400_for_malformed_token() {
    let app = spawn_app();

    for token in ["no-delimiter", ".secret", "tokenid.", "a.b.c"] {
        let response = app.refresh(token).await;
        assert_eq!(400, response.status().as_u16(), "token {:?}", token);
        assert_eq!(error_code(response).await, "invalid_refresh_format");
    }
}

#[tokio::test]
async fn refresh_returns_401_for_unknown_token() {
    let app = spawn_app();

    let response = app.refresh("0011223344556677.deadbeef").await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn logout_is_idempotent() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let t0 = refresh_token_of(&login_tokens(&app).await);

    for _ in 0..2 {
        let response = app.logout(&t0).await;
        assert_eq!(200, response.status().as_u16());
    }

    let response = app.logout("0011223344556677.anything").await;
    assert_eq!(200, response.status().as_u16());

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    let sessions = app.store.sessions_for_user(user.id).unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].revoked_at.is_some());
}

#[tokio::test]
async fn logout_needs_only_the_token_id() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let t0 = refresh_token_of(&login_tokens(&app).await);
    let token_id = t0.split_once('.').unwrap().0.to_string();

    let response = app.logout(&token_id).await;
    assert_eq!(200, response.status().as_u16());

    let response = app.refresh(&t0).await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn logout_returns_400_for_missing_token() {
    let app = spawn_app();

    for body in [json!({}), json!({ "refreshToken": "" }), json!({ "refreshToken": ".x" })] {
        let response = app.post_json("/api/auth/logout", &body).await;
        assert_eq!(400, response.status().as_u16(), "body {}", body);
    }
}

// --- Current user ---

#[tokio::test]
async fn me_returns_identity_for_valid_access_token() {
    let app = spawn_app();
    app.onboard(PHONE).await;
    let body = login_tokens(&app).await;
    let access_token = body["accessToken"].as_str().unwrap();

    let response = app
        .client
        .get(&format!("{}/api/me", app.address))
        .bearer_auth(access_token)
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let user: Value = response.json().await.unwrap();
    assert_eq!(user["phone"], PHONE);
    assert_eq!(user["fullName"], "Unknown");
}

#[tokio::test]
async fn me_rejects_missing_or_invalid_access_token() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/api/me", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "missing_token");

    let response = app
        .client
        .get(&format!("{}/api/me", app.address))
        .bearer_auth("not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "invalid_signature");
}
