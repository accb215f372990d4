//! In-memory storage implementation
//!
//! Each trait method takes the relevant write lock once, so the atomicity
//! contracts of the store traits hold without further coordination.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DeviceLogin, SessionStore, StoreResult, UserStore, VerificationStart};
use crate::error::AppError;
use crate::models::{
    Device, OutcomeWrite, Session, SessionId, SessionRotation, User, UserId, VerificationOutcome,
    VerificationStatus,
};

fn poisoned<G>(_: PoisonError<G>) -> AppError {
    AppError::Internal("in-memory store lock poisoned".to_string())
}

#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions owned by `user_id` (for inspection in tests)
    pub fn sessions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    /// Overwrite when a verification started (for exercising the expiry sweep)
    pub fn set_verification_started_at(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("user"))?;
        user.verification.started_at = Some(started_at);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users.read().map_err(poisoned)?.get(&user_id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.values().find(|u| u.phone == phone).cloned())
    }

    async fn find_by_correlation_token(&self, token: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users
            .values()
            .find(|u| u.verification.correlation_token.as_deref() == Some(token))
            .cloned())
    }

    async fn begin_verification(&self, start: VerificationStart) -> StoreResult<User> {
        let mut users = self.users.write().map_err(poisoned)?;

        let existing = users
            .values()
            .find(|u| u.phone == start.phone)
            .map(|u| u.id);
        let user_id = match existing {
            Some(id) => id,
            None => {
                let user = User::new(&start.phone, start.full_name.as_deref(), start.at);
                let id = user.id;
                users.insert(id, user);
                id
            }
        };

        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::Internal("user vanished under write lock".to_string()))?;
        let record = &mut user.verification;
        record.status = VerificationStatus::Pending;
        record.correlation_token = Some(start.correlation_token);
        record.check_url = Some(start.check_url);
        record.attempts += 1;
        record.subject_phone = Some(start.phone);
        record.started_at = Some(start.at);
        user.updated_at = start.at;

        Ok(user.clone())
    }

    async fn apply_verification_outcome(
        &self,
        user_id: UserId,
        correlation_token: &str,
        outcome: VerificationOutcome,
    ) -> StoreResult<OutcomeWrite> {
        let mut users = self.users.write().map_err(poisoned)?;
        let user = match users.get_mut(&user_id) {
            Some(user) => user,
            None => return Ok(OutcomeWrite::Superseded),
        };

        let record = &mut user.verification;
        if record.correlation_token.as_deref() != Some(correlation_token) {
            return Ok(if record.status == VerificationStatus::Verified {
                OutcomeWrite::AlreadyVerified
            } else {
                OutcomeWrite::Superseded
            });
        }
        if !outcome.verified && record.status == VerificationStatus::Verified {
            return Ok(OutcomeWrite::AlreadyVerified);
        }

        record.status = outcome.status();
        record.method = Some(outcome.method);
        record.raw_response = outcome.raw_response;
        if outcome.verified {
            record.correlation_token = None;
            if record.verified_at.is_none() {
                record.verified_at = Some(outcome.at);
            }
        }
        user.updated_at = outcome.at;

        Ok(OutcomeWrite::Applied)
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut users = self.users.write().map_err(poisoned)?;
        let mut expired = 0;
        for user in users.values_mut() {
            let record = &mut user.verification;
            let stale = record.status == VerificationStatus::Pending
                && record.started_at.map_or(false, |at| at < cutoff);
            if stale {
                record.status = VerificationStatus::Expired;
                record.correlation_token = None;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn record_login(
        &self,
        user_id: UserId,
        device: Option<DeviceLogin>,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut users = self.users.write().map_err(poisoned)?;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("user"))?;

        if let Some(device) = device {
            match user
                .devices
                .iter_mut()
                .find(|d| d.device_id == device.device_id)
            {
                Some(known) => known.last_seen_at = at,
                None => user.devices.push(Device {
                    device_id: device.device_id,
                    platform: device.platform,
                    last_seen_at: at,
                }),
            }
        }
        user.last_login_at = Some(at);
        user.updated_at = at;

        Ok(user.clone())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions
            .values()
            .any(|s| !s.is_revoked() && s.token_id == session.token_id)
        {
            return Err(crate::error::DatabaseError::UniqueConstraintViolation(
                "sessions.token_id".to_string(),
            )
            .into());
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_id(&self, token_id: &str) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut matching: Vec<&Session> =
            sessions.values().filter(|s| s.token_id == token_id).collect();
        matching.sort_by_key(|s| s.is_revoked());
        Ok(matching.first().map(|s| (*s).clone()))
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(&rotation.session_id) {
            Some(session)
                if !session.is_revoked()
                    && session.token_id == rotation.expected_token_id
                    && session.refresh_token_hash == rotation.expected_hash =>
            {
                session.token_id = rotation.new_token_id;
                session.refresh_token_hash = rotation.new_hash;
                session.last_seen_at = rotation.at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(&session_id) {
            Some(session) if !session.is_revoked() => {
                session.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_token_id(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let live = sessions
            .values_mut()
            .find(|s| !s.is_revoked() && s.token_id == token_id);
        Ok(live.map(|session| {
            session.revoked_at = Some(at);
            session.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerificationMethod;
    use uuid::Uuid;

    fn start(phone: &str, token: &str) -> VerificationStart {
        VerificationStart {
            phone: phone.to_string(),
            full_name: Some("Asha".to_string()),
            correlation_token: token.to_string(),
            check_url: format!("https://auth.example.com/authorize?state={}", token),
            at: Utc::now(),
        }
    }

    fn outcome(verified: bool) -> VerificationOutcome {
        VerificationOutcome {
            verified,
            method: VerificationMethod::Webhook,
            raw_response: None,
            at: Utc::now(),
        }
    }

    fn session(token_id: &str, hash: &str) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_id: None,
            token_id: token_id.to_string(),
            refresh_token_hash: hash.to_string(),
            issued_at: now,
            last_seen_at: now,
            revoked_at: None,
            ip: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn begin_verification_reuses_identity_and_counts_attempts() {
        let store = InMemoryStore::new();

        let first = store.begin_verification(start("+10000000001", "t1")).await.unwrap();
        let second = store.begin_verification(start("+10000000001", "t2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.verification.attempts, 2);
        assert_eq!(second.verification.correlation_token.as_deref(), Some("t2"));
        assert!(store.find_by_correlation_token("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_outcome_never_overrides_verified() {
        let store = InMemoryStore::new();
        let user = store.begin_verification(start("+10000000001", "t1")).await.unwrap();

        let write = store
            .apply_verification_outcome(user.id, "t1", outcome(true))
            .await
            .unwrap();
        assert_eq!(write, OutcomeWrite::Applied);

        let write = store
            .apply_verification_outcome(user.id, "t1", outcome(false))
            .await
            .unwrap();
        assert_eq!(write, OutcomeWrite::AlreadyVerified);

        let user = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.verification.status, VerificationStatus::Verified);
        assert!(user.verification.correlation_token.is_none());
    }

    #[tokio::test]
    async fn verified_at_is_set_once() {
        let store = InMemoryStore::new();
        let user = store.begin_verification(start("+10000000001", "t1")).await.unwrap();
        store
            .apply_verification_outcome(user.id, "t1", outcome(true))
            .await
            .unwrap();
        let first = store.find_by_id(user.id).await.unwrap().unwrap();

        store.begin_verification(start("+10000000001", "t2")).await.unwrap();
        store
            .apply_verification_outcome(user.id, "t2", outcome(true))
            .await
            .unwrap();
        let second = store.find_by_id(user.id).await.unwrap().unwrap();

        assert_eq!(first.verification.verified_at, second.verification.verified_at);
    }

    #[tokio::test]
    async fn rotate_session_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let s = session("id0", "hash0");
        store.insert_session(&s).await.unwrap();

        let rotation = |new_id: &str| SessionRotation {
            session_id: s.id,
            expected_token_id: "id0".to_string(),
            expected_hash: "hash0".to_string(),
            new_token_id: new_id.to_string(),
            new_hash: format!("hash-{}", new_id),
            at: Utc::now(),
        };

        assert!(store.rotate_session(rotation("id1")).await.unwrap());
        assert!(!store.rotate_session(rotation("id2")).await.unwrap());

        let current = store.find_by_token_id("id1").await.unwrap().unwrap();
        assert_eq!(current.refresh_token_hash, "hash-id1");
        assert!(store.find_by_token_id("id0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoked_sessions_cannot_rotate() {
        let store = InMemoryStore::new();
        let s = session("id0", "hash0");
        store.insert_session(&s).await.unwrap();

        assert!(store.revoke_session(s.id, Utc::now()).await.unwrap());
        assert!(!store.revoke_session(s.id, Utc::now()).await.unwrap());

        let rotated = store
            .rotate_session(SessionRotation {
                session_id: s.id,
                expected_token_id: "id0".to_string(),
                expected_hash: "hash0".to_string(),
                new_token_id: "id1".to_string(),
                new_hash: "hash1".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!rotated);
    }

    #[tokio::test]
    async fn live_token_id_must_be_unique() {
        let store = InMemoryStore::new();
        store.insert_session(&session("dup", "a")).await.unwrap();

        assert!(store.insert_session(&session("dup", "b")).await.is_err());
    }
}
