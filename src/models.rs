//! Identity, verification and session records shared by the services and stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ValidationError};

pub type UserId = Uuid;
pub type SessionId = Uuid;

pub const DEFAULT_DISPLAY_NAME: &str = "Unknown";
pub const DEFAULT_ROLE: &str = "user";

/// Status of a user's phone-number verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Failed,
    /// Only reached through `VerificationCorrelator::expire_stale`
    Expired,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "failed" => Ok(VerificationStatus::Failed),
            "expired" => Ok(VerificationStatus::Expired),
            other => Err(AppError::Internal(format!(
                "unknown verification status stored: {}",
                other
            ))),
        }
    }
}

/// Which confirmation path concluded a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    AuthorizationCode,
    Webhook,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::AuthorizationCode => "authorization_code",
            VerificationMethod::Webhook => "webhook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(VerificationMethod::AuthorizationCode),
            "webhook" => Some(VerificationMethod::Webhook),
            _ => None,
        }
    }
}

/// Verification sub-record embedded in a user identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationRecord {
    pub status: VerificationStatus,
    /// `state` value of the in-flight authorization flow. Cleared on success.
    pub correlation_token: Option<String>,
    /// Last authorization URL handed to the client
    pub check_url: Option<String>,
    pub attempts: i32,
    pub subject_phone: Option<String>,
    pub method: Option<VerificationMethod>,
    pub started_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Last provider or webhook payload, kept for operators only
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            _ => Err(ValidationError::InvalidFormat("deviceInfo.platform".to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub platform: Platform,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    /// Unique across identities
    pub phone: String,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub verification: VerificationRecord,
    pub devices: Vec<Device>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(phone: &str, full_name: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.unwrap_or(DEFAULT_DISPLAY_NAME).to_string(),
            phone: phone.to_string(),
            roles: vec![DEFAULT_ROLE.to_string()],
            is_active: true,
            verification: VerificationRecord::default(),
            devices: Vec::new(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification.status == VerificationStatus::Verified
    }

    /// Projection safe to hand to clients
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.to_string(),
            full_name: self.full_name.clone(),
            phone: self.phone.clone(),
            roles: self.roles.clone(),
            is_active: self.is_active,
            verification: PublicVerification {
                status: self.verification.status,
                attempts: self.verification.attempts,
                method: self.verification.method,
                verified_at: self.verification.verified_at,
            },
            devices: self.devices.clone(),
            last_login_at: self.last_login_at,
            created_at: self.created_at,
        }
    }
}

/// Public identity projection. Never carries the correlation token, the
/// authorization URL or the raw provider payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub full_name: String,
    pub phone: String,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub verification: PublicVerification,
    pub devices: Vec<Device>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicVerification {
    pub status: VerificationStatus,
    pub attempts: i32,
    pub method: Option<VerificationMethod>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Result of one confirmation path, applied atomically by the user store
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub method: VerificationMethod,
    pub raw_response: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl VerificationOutcome {
    pub fn status(&self) -> VerificationStatus {
        if self.verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        }
    }
}

/// What the store did with a `VerificationOutcome`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeWrite {
    Applied,
    /// Record was already verified; a failure was ignored or a success replayed
    AlreadyVerified,
    /// The correlation token no longer belongs to this record (re-init or sweep)
    Superseded,
}

/// Persisted refresh-token lineage. Rotation mutates `token_id` and
/// `refresh_token_hash` in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub device_id: Option<String>,
    pub token_id: String,
    pub refresh_token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Compare-and-swap request for a refresh rotation
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub session_id: SessionId,
    pub expected_token_id: String,
    pub expected_hash: String,
    pub new_token_id: String,
    pub new_hash: String,
    pub at: DateTime<Utc>,
}
