//! Network as Code number-verification client
//!
//! Reaches the provider over HTTPS, optionally through the RapidAPI gateway
//! (when a RapidAPI key is configured every request carries the
//! `X-RapidAPI-Host`/`X-RapidAPI-Key` pair).

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{CodeExchange, NumberVerification, VerificationProvider};
use crate::configuration::ProviderSettings;
use crate::error::{AppError, ConfigError, ProviderError};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const VERIFY_PATH: &str =
    "/passthrough/camara/v1/number-verification/number-verification/v0/verify";

/// Subset of the OpenID discovery document the flow needs
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct ClientCredentials {
    #[serde(alias = "clientId")]
    pub client_id: String,
    #[serde(alias = "clientSecret")]
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

pub struct NacProvider {
    http_client: reqwest::Client,
    settings: ProviderSettings,
    /// Filled from configuration, or by the first caller that needs it
    credentials: OnceCell<ClientCredentials>,
}

impl NacProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("provider http client: {}", e)))?;
        Ok(Self::with_client(settings, http_client))
    }

    pub fn with_client(settings: ProviderSettings, http_client: reqwest::Client) -> Self {
        let configured = match (&settings.client_id, &settings.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(ClientCredentials {
                    client_id: id.clone(),
                    client_secret: secret.clone(),
                })
            }
            _ => None,
        };

        Self {
            http_client,
            settings,
            credentials: OnceCell::new_with(configured),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn with_gateway_headers(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.settings.rapidapi_key, &self.settings.rapidapi_host) {
            (Some(key), host) if !key.is_empty() => request
                .header("X-RapidAPI-Key", key)
                .header("X-RapidAPI-Host", host.as_deref().unwrap_or_default()),
            _ => request,
        }
    }

    /// Resolve the provider's discovery document
    #[tracing::instrument(name = "provider.discovery", skip(self))]
    pub async fn discovery(&self) -> Result<DiscoveryDocument, AppError> {
        let response = self
            .with_gateway_headers(self.http_client.get(self.endpoint(DISCOVERY_PATH)))
            .send()
            .await?
            .error_for_status()?;

        response.json::<DiscoveryDocument>().await.map_err(|e| {
            ProviderError::Unavailable(format!("malformed discovery document: {}", e)).into()
        })
    }

    /// Client credentials, fetched at most once per process. Concurrent
    /// first callers share one in-flight request; a failed fetch is retried by
    /// the next caller.
    pub async fn client_credentials(&self) -> Result<&ClientCredentials, AppError> {
        self.credentials
            .get_or_try_init(|| self.fetch_client_credentials())
            .await
    }

    #[tracing::instrument(name = "provider.client_credentials", skip(self))]
    async fn fetch_client_credentials(&self) -> Result<ClientCredentials, AppError> {
        let response = self
            .with_gateway_headers(
                self.http_client
                    .get(self.endpoint(&self.settings.credentials_path)),
            )
            .send()
            .await?
            .error_for_status()?;

        let credentials = response.json::<ClientCredentials>().await.map_err(|e| {
            AppError::from(ProviderError::Unavailable(format!(
                "malformed client credentials: {}",
                e
            )))
        })?;
        tracing::info!(client_id = %credentials.client_id, "Fetched provider client credentials");
        Ok(credentials)
    }
}

#[async_trait]
impl VerificationProvider for NacProvider {
    async fn authorization_url(&self, phone: &str, state: &str) -> Result<String, AppError> {
        let discovery = self.discovery().await?;
        let credentials = self.client_credentials().await?;

        let url = Url::parse_with_params(
            &discovery.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", credentials.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", self.settings.scope.as_str()),
                ("login_hint", phone),
                ("state", state),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| {
            ProviderError::Unavailable(format!("invalid authorization endpoint: {}", e))
        })?;

        Ok(url.to_string())
    }

    #[tracing::instrument(name = "provider.exchange_code", skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<CodeExchange, AppError> {
        let discovery = self.discovery().await?;
        let credentials = self.client_credentials().await?;

        let response = self
            .with_gateway_headers(self.http_client.post(&discovery.token_endpoint))
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = read_json_body(response).await;
        if status.is_server_error() {
            return Err(ProviderError::Unavailable(format!(
                "token endpoint returned {}: {}",
                status, body
            ))
            .into());
        }
        if !status.is_success() {
            return Ok(CodeExchange::Rejected { raw_response: body });
        }

        Ok(CodeExchange::from_token_response(body))
    }

    #[tracing::instrument(name = "provider.verify_number", skip_all)]
    async fn verify_number(
        &self,
        access_token: &str,
        phone: &str,
    ) -> Result<NumberVerification, AppError> {
        let response = self
            .with_gateway_headers(self.http_client.post(self.endpoint(VERIFY_PATH)))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "phoneNumber": phone }))
            .send()
            .await?;

        let status = response.status();
        let body = read_json_body(response).await;
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Unavailable(format!(
                "verify endpoint returned {}: {}",
                status, body
            ))
            .into());
        }

        // A 4xx answer is a definitive rejection; its body normalises to false
        // unless it explicitly says otherwise.
        Ok(NumberVerification::from_payload(body))
    }
}

/// Body as JSON, or the text wrapped in `{"body": ...}` when it is not JSON
async fn read_json_body(response: reqwest::Response) -> Value {
    match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "body": text })),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}
