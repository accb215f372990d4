mod common;

use phonegate::models::{VerificationMethod, VerificationStatus};
use phonegate::store::UserStore;
use serde_json::{json, Value};

use common::{spawn_app, CODE_REJECTED, CODE_UNREACHABLE, PHONE};

// --- Init ---

#[tokio::test]
async fn init_returns_authorization_url_and_guidance() {
    let app = spawn_app();

    let response = app
        .post_json(
            "/api/auth/onboard/init",
            &json!({ "phone": PHONE, "fullName": "Asha" }),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    let url = body["authorizationUrl"].as_str().unwrap();
    assert!(url.contains("login_hint=%2B10000000001"));
    assert_eq!(
        body["message"],
        "Open authorizationUrl on the user device in system browser using mobile data."
    );

    let state = common::state_of(url);
    assert_eq!(state.len(), 32);

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.full_name, "Asha");
    assert_eq!(user.verification.status, VerificationStatus::Pending);
    assert_eq!(user.verification.attempts, 1);
    assert_eq!(user.verification.correlation_token.as_deref(), Some(state.as_str()));
}

#[tokio::test]
async fn init_returns_400_when_phone_is_missing_or_malformed() {
    let app = spawn_app();
    let test_cases = vec![
        (json!({}), "missing phone"),
        (json!({ "phone": "" }), "empty phone"),
        (json!({ "phone": "call me" }), "not a number"),
        (json!({ "phone": "+123" }), "too short"),
    ];

    for (body, description) in test_cases {
        let response = app.post_json("/api/auth/onboard/init", &body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "Init did not fail with 400 for {}",
            description
        );
    }
}

#[tokio::test]
async fn init_returns_503_and_persists_nothing_when_provider_is_down() {
    let app = spawn_app();
    app.provider.set_available(false);

    let response = app
        .post_json("/api/auth/onboard/init", &json!({ "phone": PHONE }))
        .await;

    assert_eq!(503, response.status().as_u16());
    assert!(app.store.find_by_phone(PHONE).await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_init_replaces_the_state_and_counts_attempts() {
    let app = spawn_app();

    let first = app.init(PHONE).await;
    let second = app.init(PHONE).await;
    assert_ne!(first, second);

    let response = app.callback("abc", &first).await;
    assert_eq!(404, response.status().as_u16());

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.attempts, 2);
    assert_eq!(user.verification.status, VerificationStatus::Pending);
}

// --- Callback ---

#[tokio::test]
async fn callback_verifies_and_consumes_state() {
    let app = spawn_app();
    let state = app.init(PHONE).await;

    let response = app.callback("abc", &state).await;

    assert_eq!(200, response.status().as_u16());
    assert!(response.text().await.unwrap().contains("successful"));

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Verified);
    assert!(user.verification.correlation_token.is_none());
    assert!(user.verification.verified_at.is_some());
    assert_eq!(
        user.verification.method,
        Some(VerificationMethod::AuthorizationCode)
    );
    assert_eq!(app.provider.verified_phones(), vec![PHONE.to_string()]);

    // Replay of the same redirect
    let response = app.callback("abc", &state).await;
    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn callback_with_negative_verdict_keeps_state_for_webhook() {
    let app = spawn_app();
    app.provider
        .answer_verify_with(json!({ "devicePhoneNumberVerified": true }));
    let state = app.init(PHONE).await;

    let response = app.callback("abc", &state).await;

    assert_eq!(200, response.status().as_u16());
    assert!(response.text().await.unwrap().contains("failed"));

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Failed);
    assert_eq!(user.verification.correlation_token.as_deref(), Some(state.as_str()));
    assert!(user.verification.raw_response.is_some());
}

#[tokio::test]
async fn callback_records_rejected_code_exchange() {
    let app = spawn_app();
    let state = app.init(PHONE).await;

    let response = app.callback(CODE_REJECTED, &state).await;

    assert_eq!(502, response.status().as_u16());
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Failed);
    assert_eq!(
        user.verification.raw_response,
        Some(json!({ "error": "invalid_grant" }))
    );
    assert!(app.provider.verified_phones().is_empty());
}

#[tokio::test]
async fn callback_treats_unreachable_token_endpoint_as_exchange_failure() {
    let app = spawn_app();
    let state = app.init(PHONE).await;

    let response = app.callback(CODE_UNREACHABLE, &state).await;

    assert_eq!(502, response.status().as_u16());
    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Failed);
}

#[tokio::test]
async fn callback_returns_400_when_code_or_state_is_missing() {
    let app = spawn_app();

    for query in ["", "?code=abc", "?state=abc"] {
        let response = app
            .client
            .get(&format!("{}/api/auth/onboard/callback{}", app.address, query))
            .send()
            .await
            .unwrap();
        assert_eq!(400, response.status().as_u16(), "query {:?}", query);
    }
}

#[tokio::test]
async fn callback_returns_404_for_forged_state() {
    let app = spawn_app();
    app.init(PHONE).await;

    let response = app.callback("abc", "00000000000000000000000000000000").await;

    assert_eq!(404, response.status().as_u16());
}

// --- Webhook ---

#[tokio::test]
async fn webhook_accepts_each_correlation_shape() {
    let app = spawn_app();
    let shapes = [
        ("+10000000011", "state"),
        ("+10000000012", "requestId"),
        ("+10000000013", "nonce"),
    ];

    for (phone, key) in shapes {
        let state = app.init(phone).await;
        let response = app
            .post_json(
                "/api/auth/onboard/webhook",
                &json!({ key: state, "status": "verified" }),
            )
            .await;

        assert_eq!(200, response.status().as_u16(), "shape {}", key);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "ok": true }));

        let user = app.store.find_by_phone(phone).await.unwrap().unwrap();
        assert_eq!(user.verification.status, VerificationStatus::Verified);
        assert_eq!(user.verification.method, Some(VerificationMethod::Webhook));
    }
}

#[tokio::test]
async fn webhook_failure_after_callback_success_does_not_regress() {
    let app = spawn_app();
    app.provider.answer_verify_with(json!(false));
    let state = app.init(PHONE).await;

    // Callback fails first; the state stays live for the webhook
    app.callback("abc", &state).await;
    let response = app
        .post_json(
            "/api/auth/onboard/webhook",
            &json!({ "state": state, "result": true }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());

    // A late negative webhook can no longer correlate
    let response = app
        .post_json(
            "/api/auth/onboard/webhook",
            &json!({ "state": state, "status": "failed" }),
        )
        .await;
    assert_eq!(404, response.status().as_u16());

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Verified);
}

#[tokio::test]
async fn webhook_replay_of_failure_is_idempotent() {
    let app = spawn_app();
    let state = app.init(PHONE).await;
    let payload = json!({ "requestId": state, "verificationStatus": "rejected" });

    for _ in 0..2 {
        let response = app.post_json("/api/auth/onboard/webhook", &payload).await;
        assert_eq!(200, response.status().as_u16());
    }

    let user = app.store.find_by_phone(PHONE).await.unwrap().unwrap();
    assert_eq!(user.verification.status, VerificationStatus::Failed);
    assert_eq!(user.verification.attempts, 1);
    assert_eq!(user.verification.correlation_token.as_deref(), Some(state.as_str()));
}

#[tokio::test]
async fn webhook_returns_400_without_correlation_value() {
    let app = spawn_app();

    for payload in [json!({ "status": "verified" }), json!({ "state": "" }), json!([1, 2])] {
        let response = app.post_json("/api/auth/onboard/webhook", &payload).await;
        assert_eq!(400, response.status().as_u16(), "payload {}", payload);
    }
}

#[tokio::test]
async fn webhook_returns_404_for_unknown_state() {
    let app = spawn_app();

    let response = app
        .post_json(
            "/api/auth/onboard/webhook",
            &json!({ "state": "feedface", "status": "verified" }),
        )
        .await;

    assert_eq!(404, response.status().as_u16());
}
