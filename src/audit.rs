/// Security audit trail
///
/// Verification transitions and session lifecycle events are written as
/// structured `tracing` records so operators can reconstruct what happened to
/// an identity without querying the store. FAILURE entries are logged at
/// `warn`, everything else at `info`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const SUCCESS: &str = "SUCCESS";
pub const FAILURE: &str = "FAILURE";

mod datetime_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deser: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deser)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// One audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub log_id: String,
    #[serde(with = "datetime_format")]
    pub timestamp: DateTime<Utc>,
    /// VERIFICATION_INIT, SESSION_ROTATE, SESSION_REVOKE, ...
    pub action: String,
    /// verification, session
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    /// SUCCESS or FAILURE
    pub status: String,
    pub message: String,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
}

impl AuditLog {
    pub fn new(action: &str, resource_type: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            user_id: None,
            status: status.to_string(),
            message: message.into(),
            previous_state: None,
            new_state: None,
        }
    }

    pub fn success(action: &str, resource_type: &str, message: impl Into<String>) -> Self {
        Self::new(action, resource_type, SUCCESS, message)
    }

    pub fn failure(action: &str, resource_type: &str, message: impl Into<String>) -> Self {
        Self::new(action, resource_type, FAILURE, message)
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_state_change(mut self, previous: &str, new: &str) -> Self {
        self.previous_state = Some(previous.to_string());
        self.new_state = Some(new.to_string());
        self
    }

    /// Emit the entry
    pub fn record(&self) {
        if self.status == FAILURE {
            tracing::warn!(
                log_id = %self.log_id,
                action = %self.action,
                resource_type = %self.resource_type,
                resource_id = ?self.resource_id,
                user_id = ?self.user_id,
                previous_state = ?self.previous_state,
                new_state = ?self.new_state,
                message = %self.message,
                "Audit log entry"
            );
        } else {
            tracing::info!(
                log_id = %self.log_id,
                action = %self.action,
                resource_type = %self.resource_type,
                resource_id = ?self.resource_id,
                user_id = ?self.user_id,
                previous_state = ?self.previous_state,
                new_state = ?self.new_state,
                message = %self.message,
                "Audit log entry"
            );
        }
    }
}

/// Short, non-reversible label for a secret-bearing value (correlation
/// state), safe to put in logs.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_entry_builders() {
        let entry = AuditLog::failure("SESSION_REVOKE", "session", "refresh secret mismatch")
            .with_resource_id("abcd")
            .with_user_id(Uuid::nil())
            .with_state_change("active", "revoked");

        assert_eq!(entry.status, FAILURE);
        assert_eq!(entry.resource_id.as_deref(), Some("abcd"));
        assert_eq!(entry.user_id, Some(Uuid::nil().to_string()));
        assert_eq!(entry.new_state.as_deref(), Some("revoked"));
    }

    #[test]
    fn test_audit_entry_serializes_timestamp_as_rfc3339() {
        let entry = AuditLog::success("VERIFICATION_INIT", "verification", "started");
        let json = serde_json::to_value(&entry).unwrap();
        let back: AuditLog = serde_json::from_value(json.clone()).unwrap();

        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(back.timestamp, entry.timestamp);
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("0123456789abcdef0123456789abcdef");
        assert_eq!(a, fingerprint("0123456789abcdef0123456789abcdef"));
        assert_eq!(a.len(), 12);
        assert_ne!(a, fingerprint("different"));
    }
}
