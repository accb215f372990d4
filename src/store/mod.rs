//! Storage abstractions for identities and sessions
//!
//! Every operation that can race with another request is a single atomic
//! write in each implementation:
//! - `apply_verification_outcome` never turns a verified record into a failed one
//! - `rotate_session` is a compare-and-swap on the current token id and hash

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    OutcomeWrite, Platform, Session, SessionId, SessionRotation, User, UserId, VerificationOutcome,
};

/// Result type for store operations
pub type StoreResult<T> = Result<T, AppError>;

/// Parameters of a verification (re)start
#[derive(Debug, Clone)]
pub struct VerificationStart {
    pub phone: String,
    pub full_name: Option<String>,
    pub correlation_token: String,
    pub check_url: String,
    pub at: DateTime<Utc>,
}

/// Device touched by a login
#[derive(Debug, Clone)]
pub struct DeviceLogin {
    pub device_id: String,
    pub platform: Platform,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>>;

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;

    async fn find_by_correlation_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Find-or-create the identity for `phone`, then in the same write set the
    /// verification to pending with the new token and bump `attempts`.
    async fn begin_verification(&self, start: VerificationStart) -> StoreResult<User>;

    /// Apply a confirmation result to the record of `user_id`, provided it
    /// still carries `correlation_token`. A verified outcome clears the token
    /// and sets `verified_at` if unset; a failed outcome keeps the token and is
    /// ignored when the record is already verified.
    async fn apply_verification_outcome(
        &self,
        user_id: UserId,
        correlation_token: &str,
        outcome: VerificationOutcome,
    ) -> StoreResult<OutcomeWrite>;

    /// Mark pending verifications started before `cutoff` as expired and
    /// clear their tokens. Returns the number of records changed.
    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Upsert the device (if any) and stamp `last_login_at`
    async fn record_login(
        &self,
        user_id: UserId,
        device: Option<DeviceLogin>,
        at: DateTime<Utc>,
    ) -> StoreResult<User>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Look up by current token id. A live session wins over revoked ones
    /// that happen to share the id.
    async fn find_by_token_id(&self, token_id: &str) -> StoreResult<Option<Session>>;

    /// Swap token id and hash iff the session is live and still holds the
    /// expected pair. Returns whether the swap happened.
    async fn rotate_session(&self, rotation: SessionRotation) -> StoreResult<bool>;

    /// Revoke a live session. Returns false if it was already revoked.
    async fn revoke_session(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Revoke the live session currently holding `token_id`, if any
    async fn revoke_by_token_id(&self, token_id: &str, at: DateTime<Utc>)
        -> StoreResult<Option<Session>>;
}
