//! Shared harness: the real actix server on a random port, backed by the
//! in-memory store and a scripted verification provider.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use phonegate::configuration::{JwtSettings, RefreshSettings, VerificationSettings};
use phonegate::error::{AppError, ProviderError};
use phonegate::provider::{CodeExchange, NumberVerification, VerificationProvider};
use phonegate::session::SessionManager;
use phonegate::startup::run;
use phonegate::store::InMemoryStore;
use phonegate::verification::VerificationCorrelator;
use serde_json::{json, Value};

pub const PHONE: &str = "+10000000001";

/// Authorization codes the scripted provider treats specially
pub const CODE_REJECTED: &str = "rejected";
pub const CODE_UNREACHABLE: &str = "unreachable";

/// In-process stand-in for the operator's verification API
pub struct ScriptedProvider {
    available: Mutex<bool>,
    verify_payload: Mutex<Value>,
    verified_phones: Mutex<Vec<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            available: Mutex::new(true),
            verify_payload: Mutex::new(json!({ "result": true })),
            verified_phones: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedProvider {
    pub fn set_available(&self, available: bool) {
        *self.available.lock().unwrap() = available;
    }

    /// Body returned by the next number-verification calls
    pub fn answer_verify_with(&self, payload: Value) {
        *self.verify_payload.lock().unwrap() = payload;
    }

    pub fn verified_phones(&self) -> Vec<String> {
        self.verified_phones.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerificationProvider for ScriptedProvider {
    async fn authorization_url(&self, phone: &str, state: &str) -> Result<String, AppError> {
        if !*self.available.lock().unwrap() {
            return Err(ProviderError::Unavailable("discovery failed".to_string()).into());
        }
        let url = reqwest::Url::parse_with_params(
            "https://operator.example.com/authorize",
            &[("login_hint", phone), ("state", state)],
        )
        .unwrap();
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<CodeExchange, AppError> {
        match code {
            CODE_REJECTED => Ok(CodeExchange::Rejected {
                raw_response: json!({ "error": "invalid_grant" }),
            }),
            CODE_UNREACHABLE => {
                Err(ProviderError::Unavailable("token endpoint timed out".to_string()).into())
            }
            other => Ok(CodeExchange::Granted {
                access_token: format!("at-{}", other),
            }),
        }
    }

    async fn verify_number(
        &self,
        _access_token: &str,
        phone: &str,
    ) -> Result<NumberVerification, AppError> {
        self.verified_phones.lock().unwrap().push(phone.to_string());
        let payload = self.verify_payload.lock().unwrap().clone();
        Ok(NumberVerification::from_payload(payload))
    }
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret-at-least-32-chars".to_string(),
        access_token_expiry: 900,
        issuer: "phonegate".to_string(),
    }
}

/// Wire both services over one store, with a cheap bcrypt cost
pub fn services(
    store: Arc<InMemoryStore>,
    provider: Arc<ScriptedProvider>,
) -> (VerificationCorrelator, SessionManager) {
    let correlator =
        VerificationCorrelator::new(store.clone(), provider, VerificationSettings::default());
    let sessions = SessionManager::new(
        store.clone(),
        store,
        jwt_settings(),
        RefreshSettings { bcrypt_cost: 4 },
    );
    (correlator, sessions)
}

/// `state` query parameter of an authorization URL
pub fn state_of(authorization_url: &str) -> String {
    reqwest::Url::parse(authorization_url)
        .expect("authorization URL parses")
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("authorization URL carries state")
}

/// Run Init then a successful Callback directly against the correlator
pub async fn verify_phone(correlator: &VerificationCorrelator, phone: &str) {
    let started = correlator.init(phone, Some("Asha")).await.unwrap();
    correlator
        .callback("abc", &state_of(&started.authorization_url))
        .await
        .unwrap();
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub client: reqwest::Client,
}

pub fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    let (correlator, sessions) = services(store.clone(), provider.clone());

    let server = run(listener, correlator, sessions).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        store,
        provider,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Init for `phone`, returning the `state` embedded in the authorization URL
    pub async fn init(&self, phone: &str) -> String {
        let response = self
            .post_json("/api/auth/onboard/init", &json!({ "phone": phone }))
            .await;
        assert_eq!(200, response.status().as_u16());

        let body: Value = response.json().await.unwrap();
        state_of(body["authorizationUrl"].as_str().unwrap())
    }

    pub async fn callback(&self, code: &str, state: &str) -> reqwest::Response {
        self.client
            .get(&format!("{}/api/auth/onboard/callback", self.address))
            .query(&[("code", code), ("state", state)])
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Init + successful callback over HTTP
    pub async fn onboard(&self, phone: &str) {
        let state = self.init(phone).await;
        let response = self.callback("abc", &state).await;
        assert_eq!(200, response.status().as_u16());
    }

    pub async fn login(&self, phone: &str) -> reqwest::Response {
        self.post_json(
            "/api/auth/login",
            &json!({
                "phone": phone,
                "deviceId": "pixel-7",
                "deviceInfo": { "platform": "android" }
            }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json(
            "/api/auth/refresh",
            &json!({ "refreshToken": refresh_token }),
        )
        .await
    }

    pub async fn logout(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json("/api/auth/logout", &json!({ "refreshToken": refresh_token }))
            .await
    }
}
