//! Verification Correlator
//!
//! Drives a user's verification record through
//! `pending -> {verified | failed}` (and `failed -> pending` on re-init),
//! bridging the browser redirect flow (callback) and the provider's
//! server-to-server confirmation (webhook). Both paths correlate on the
//! unguessable `state` value generated at init.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{fingerprint, AuditLog};
use crate::auth::random_hex;
use crate::configuration::VerificationSettings;
use crate::error::{AppError, ProviderError, ValidationError};
use crate::models::{OutcomeWrite, User, VerificationMethod, VerificationOutcome, VerificationStatus};
use crate::provider::{CodeExchange, VerificationProvider};
use crate::store::{UserStore, VerificationStart};
use crate::validators::{is_valid_name, is_valid_phone};

/// Bytes of entropy in a correlation token
pub const CORRELATION_TOKEN_BYTES: usize = 16;

pub const INIT_GUIDANCE: &str =
    "Open authorizationUrl on the user device in system browser using mobile data.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStarted {
    pub authorization_url: String,
    pub message: String,
}

/// Result of the redirect callback, rendered to the user's browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Verified,
    Failed,
    ExchangeFailed,
}

/// Accepted webhook shapes. Correlation comes from `state`, `requestId` or
/// `nonce`; status from `status`, `verificationStatus` or a boolean `result`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    state: Option<Value>,
    request_id: Option<Value>,
    nonce: Option<Value>,
    status: Option<Value>,
    verification_status: Option<Value>,
    result: Option<Value>,
}

fn non_empty_str(value: &Option<Value>) -> Option<&str> {
    value.as_ref().and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl WebhookPayload {
    fn correlation(&self) -> Option<&str> {
        non_empty_str(&self.state)
            .or_else(|| non_empty_str(&self.request_id))
            .or_else(|| non_empty_str(&self.nonce))
    }

    fn verified(&self) -> bool {
        match non_empty_str(&self.status).or_else(|| non_empty_str(&self.verification_status)) {
            Some(status) => status == VerificationStatus::Verified.as_str(),
            None => matches!(self.result, Some(Value::Bool(true))),
        }
    }
}

pub struct VerificationCorrelator {
    users: Arc<dyn UserStore>,
    provider: Arc<dyn VerificationProvider>,
    settings: VerificationSettings,
}

impl VerificationCorrelator {
    pub fn new(
        users: Arc<dyn UserStore>,
        provider: Arc<dyn VerificationProvider>,
        settings: VerificationSettings,
    ) -> Self {
        Self {
            users,
            provider,
            settings,
        }
    }

    /// Start (or restart) verification for `phone`
    ///
    /// The identity is created on first use. Nothing is persisted when the
    /// provider cannot produce an authorization URL.
    #[tracing::instrument(name = "verification.init", skip_all, fields(phone = %fingerprint(phone)))]
    pub async fn init(
        &self,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<VerificationStarted, AppError> {
        let phone = is_valid_phone(phone)?;
        let full_name = is_valid_name(display_name)?;

        let correlation_token = random_hex(CORRELATION_TOKEN_BYTES);
        let authorization_url = self
            .provider
            .authorization_url(&phone, &correlation_token)
            .await
            .map_err(into_unavailable)?;

        let user = self
            .users
            .begin_verification(VerificationStart {
                phone,
                full_name,
                correlation_token: correlation_token.clone(),
                check_url: authorization_url.clone(),
                at: Utc::now(),
            })
            .await?;

        AuditLog::success("VERIFICATION_INIT", "verification", "verification started")
            .with_resource_id(fingerprint(&correlation_token))
            .with_user_id(user.id)
            .with_state_change("-", VerificationStatus::Pending.as_str())
            .record();

        Ok(VerificationStarted {
            authorization_url,
            message: INIT_GUIDANCE.to_string(),
        })
    }

    /// Conclude the redirect flow for `state` with the provider's `code`
    ///
    /// Provider rejections are reported as outcomes, not errors, so the
    /// caller can render them.
    #[tracing::instrument(name = "verification.callback", skip_all, fields(state = %fingerprint(state)))]
    pub async fn callback(&self, code: &str, state: &str) -> Result<CallbackOutcome, AppError> {
        if code.trim().is_empty() {
            return Err(ValidationError::EmptyField("code".to_string()).into());
        }
        if state.trim().is_empty() {
            return Err(ValidationError::EmptyField("state".to_string()).into());
        }

        let user = self.find_by_state(state).await?;

        let access_token = match self.provider.exchange_code(code).await {
            Ok(CodeExchange::Granted { access_token }) => access_token,
            Ok(CodeExchange::Rejected { raw_response }) => {
                self.record_exchange_failure(&user, state, raw_response).await?;
                return Ok(CallbackOutcome::ExchangeFailed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authorization code exchange failed");
                let raw = serde_json::json!({ "error": e.to_string() });
                self.record_exchange_failure(&user, state, raw).await?;
                return Ok(CallbackOutcome::ExchangeFailed);
            }
        };

        let subject_phone = user
            .verification
            .subject_phone
            .clone()
            .unwrap_or_else(|| user.phone.clone());
        let verification = self
            .provider
            .verify_number(&access_token, &subject_phone)
            .await
            .map_err(into_unavailable)?;

        let outcome = VerificationOutcome {
            verified: verification.verified,
            method: VerificationMethod::AuthorizationCode,
            raw_response: Some(verification.raw_response),
            at: Utc::now(),
        };
        let status = self.apply(&user, state, outcome).await?;

        Ok(match status {
            VerificationStatus::Verified => CallbackOutcome::Verified,
            _ => CallbackOutcome::Failed,
        })
    }

    /// Apply a server-to-server confirmation. Safe to replay.
    #[tracing::instrument(name = "verification.webhook", skip_all)]
    pub async fn webhook(&self, payload: Value) -> Result<VerificationStatus, AppError> {
        let parsed: WebhookPayload = if payload.is_object() {
            serde_json::from_value(payload.clone()).unwrap_or_default()
        } else {
            WebhookPayload::default()
        };

        let state = parsed
            .correlation()
            .ok_or_else(|| ValidationError::EmptyField("state".to_string()))?
            .to_string();
        let user = self.find_by_state(&state).await?;

        let outcome = VerificationOutcome {
            verified: parsed.verified(),
            method: VerificationMethod::Webhook,
            raw_response: Some(payload),
            at: Utc::now(),
        };
        self.apply(&user, &state, outcome).await
    }

    /// Mark pending verifications older than the configured TTL as expired.
    /// Not scheduled here; callers decide when to sweep.
    pub async fn expire_stale(&self) -> Result<u64, AppError> {
        let cutoff = Utc::now() - Duration::seconds(self.settings.pending_ttl_seconds);
        let expired = self.users.expire_pending_before(cutoff).await?;
        if expired > 0 {
            AuditLog::success(
                "VERIFICATION_EXPIRE",
                "verification",
                format!("{} pending verifications expired", expired),
            )
            .with_state_change(VerificationStatus::Pending.as_str(), VerificationStatus::Expired.as_str())
            .record();
        }
        Ok(expired)
    }

    async fn find_by_state(&self, state: &str) -> Result<User, AppError> {
        self.users
            .find_by_correlation_token(state)
            .await?
            .ok_or_else(|| {
                tracing::warn!(state = %fingerprint(state), "No verification matches state");
                AppError::not_found("verification state")
            })
    }

    async fn record_exchange_failure(
        &self,
        user: &User,
        state: &str,
        raw_response: Value,
    ) -> Result<(), AppError> {
        let outcome = VerificationOutcome {
            verified: false,
            method: VerificationMethod::AuthorizationCode,
            raw_response: Some(raw_response),
            at: Utc::now(),
        };
        self.apply(user, state, outcome).await?;
        Ok(())
    }

    /// Persist an outcome and return the record's resulting status
    async fn apply(
        &self,
        user: &User,
        state: &str,
        outcome: VerificationOutcome,
    ) -> Result<VerificationStatus, AppError> {
        let previous = user.verification.status;
        let requested = outcome.status();
        let method = outcome.method;

        let write = self
            .users
            .apply_verification_outcome(user.id, state, outcome)
            .await?;

        let audit = |entry: AuditLog| {
            entry
                .with_resource_id(fingerprint(state))
                .with_user_id(user.id)
                .record()
        };

        match write {
            OutcomeWrite::Applied => {
                let message = format!("{} via {}", requested.as_str(), method.as_str());
                let entry = if requested == VerificationStatus::Verified {
                    AuditLog::success("VERIFICATION_CONCLUDE", "verification", message)
                } else {
                    AuditLog::failure("VERIFICATION_CONCLUDE", "verification", message)
                };
                audit(entry.with_state_change(previous.as_str(), requested.as_str()));
                Ok(requested)
            }
            OutcomeWrite::AlreadyVerified => {
                if requested != VerificationStatus::Verified {
                    audit(AuditLog::failure(
                        "VERIFICATION_CONCLUDE",
                        "verification",
                        format!("ignored {} result for verified record", method.as_str()),
                    ));
                }
                Ok(VerificationStatus::Verified)
            }
            OutcomeWrite::Superseded => {
                audit(AuditLog::failure(
                    "VERIFICATION_CONCLUDE",
                    "verification",
                    "correlation superseded before the result landed",
                ));
                Err(AppError::not_found("verification state"))
            }
        }
    }
}

fn into_unavailable(err: AppError) -> AppError {
    match err {
        AppError::Provider(_) => err,
        other => AppError::Provider(ProviderError::Unavailable(other.to_string())),
    }
}
