//! Phone-number verification provider boundary
//!
//! The correlator only sees this trait and the normalised types below; raw
//! provider payloads are carried along for diagnostics but never inspected
//! outside this module.

mod nac;

pub use nac::{ClientCredentials, DiscoveryDocument, NacProvider};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

/// Outcome of exchanging an authorization code
#[derive(Debug, Clone)]
pub enum CodeExchange {
    Granted { access_token: String },
    /// The provider answered but did not issue a token
    Rejected { raw_response: Value },
}

impl CodeExchange {
    /// Interpret a token endpoint response body. Both `access_token` and
    /// `accessToken` spellings are accepted.
    pub fn from_token_response(body: Value) -> Self {
        let token = body
            .get("access_token")
            .or_else(|| body.get("accessToken"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => CodeExchange::Granted {
                access_token: token.to_string(),
            },
            None => CodeExchange::Rejected { raw_response: body },
        }
    }
}

/// The shapes a number-verification response has been seen to take
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VerificationVerdict {
    Flag(bool),
    Fields {
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        success: Option<Value>,
    },
    Other(Value),
}

impl VerificationVerdict {
    pub fn from_payload(payload: &Value) -> Self {
        // serde would otherwise read a positional array into `Fields`
        if payload.is_array() {
            return Self::Other(payload.clone());
        }
        serde_json::from_value(payload.clone()).unwrap_or_else(|_| Self::Other(payload.clone()))
    }

    /// Only a literal `true` counts as verified
    pub fn is_verified(&self) -> bool {
        match self {
            VerificationVerdict::Flag(flag) => *flag,
            VerificationVerdict::Fields {
                result,
                value,
                success,
            } => [result, value, success]
                .iter()
                .any(|field| matches!(field, Some(Value::Bool(true)))),
            VerificationVerdict::Other(_) => false,
        }
    }
}

/// Number-verification response: the normalised verdict plus the raw body
#[derive(Debug, Clone)]
pub struct NumberVerification {
    pub verified: bool,
    pub raw_response: Value,
}

impl NumberVerification {
    pub fn from_payload(raw_response: Value) -> Self {
        let verified = VerificationVerdict::from_payload(&raw_response).is_verified();
        Self {
            verified,
            raw_response,
        }
    }
}

#[async_trait]
pub trait VerificationProvider: Send + Sync {
    /// Authorization URL carrying `phone` as login hint and `state` as the
    /// correlation value
    async fn authorization_url(&self, phone: &str, state: &str) -> Result<String, AppError>;

    async fn exchange_code(&self, code: &str) -> Result<CodeExchange, AppError>;

    async fn verify_number(
        &self,
        access_token: &str,
        phone: &str,
    ) -> Result<NumberVerification, AppError>;
}
