//! Session Lifecycle Manager
//!
//! Login mints an access credential plus a refresh-token lineage, refresh
//! rotates that lineage in place, logout revokes it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::auth::{generate_access_token, parse_token_id, RefreshToken};
use crate::configuration::{JwtSettings, RefreshSettings};
use crate::error::{AppError, UnauthorizedReason};
use crate::models::{Platform, PublicUser, Session, SessionRotation, User, UserId};
use crate::store::{DeviceLogin, SessionStore, UserStore};
use crate::validators::{is_valid_device_id, is_valid_phone};

/// Request metadata captured on the session row
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    #[serde(flatten)]
    pub tokens: TokenGrant,
    pub user: PublicUser,
}

pub struct SessionManager {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    jwt: JwtSettings,
    refresh: RefreshSettings,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        jwt: JwtSettings,
        refresh: RefreshSettings,
    ) -> Self {
        Self {
            users,
            sessions,
            jwt,
            refresh,
        }
    }

    pub fn jwt_settings(&self) -> &JwtSettings {
        &self.jwt
    }

    /// Open a new session for a verified identity
    #[tracing::instrument(name = "session.login", skip(self, phone, platform, client))]
    pub async fn login(
        &self,
        phone: &str,
        device_id: Option<&str>,
        platform: Option<&str>,
        client: ClientMetadata,
    ) -> Result<LoginGrant, AppError> {
        let phone = is_valid_phone(phone)?;
        let device_id = is_valid_device_id(device_id)?;
        let platform = platform.map(Platform::parse).transpose()?.unwrap_or_default();

        let user = self
            .users
            .find_by_phone(&phone)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;
        if !user.is_verified() {
            return Err(AppError::unauthorized(UnauthorizedReason::PhoneNotVerified));
        }
        if !user.is_active {
            return Err(AppError::unauthorized(UnauthorizedReason::AccountInactive));
        }

        let refresh_token = RefreshToken::generate();
        let refresh_token_hash = self.hash(&refresh_token).await?;
        let now = Utc::now();

        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            device_id: device_id.clone(),
            token_id: refresh_token.token_id().to_string(),
            refresh_token_hash,
            issued_at: now,
            last_seen_at: now,
            revoked_at: None,
            ip: client.ip,
            user_agent: client.user_agent,
        };
        self.sessions.insert_session(&session).await?;

        let device = device_id.map(|device_id| DeviceLogin { device_id, platform });
        let user = self.users.record_login(user.id, device, now).await?;

        AuditLog::success("SESSION_OPEN", "session", "login")
            .with_resource_id(session.id.to_string())
            .with_user_id(user.id)
            .with_state_change("-", "active")
            .record();

        Ok(LoginGrant {
            tokens: self.grant(&user, &refresh_token)?,
            user: user.to_public(),
        })
    }

    /// Exchange a refresh token for a new pair. Each refresh token is
    /// single-use; a wrong secret against a live token id revokes the session.
    #[tracing::instrument(name = "session.refresh", skip_all)]
    pub async fn refresh(&self, raw: &str) -> Result<TokenGrant, AppError> {
        let presented = RefreshToken::parse(raw)?;

        let session = self
            .sessions
            .find_by_token_id(presented.token_id())
            .await?
            .ok_or_else(|| AppError::unauthorized(UnauthorizedReason::InvalidRefresh))?;
        if session.is_revoked() {
            return Err(AppError::not_found("session"));
        }

        if !self.verify(&presented, &session.refresh_token_hash).await? {
            let now = Utc::now();
            self.sessions.revoke_session(session.id, now).await?;
            AuditLog::failure("SESSION_REVOKE", "session", "refresh secret mismatch")
                .with_resource_id(session.id.to_string())
                .with_user_id(session.user_id)
                .with_state_change("active", "revoked")
                .record();
            return Err(AppError::unauthorized(UnauthorizedReason::InvalidRefresh));
        }

        let user = self.load_user(session.user_id).await?;
        if !user.is_active {
            return Err(AppError::unauthorized(UnauthorizedReason::AccountInactive));
        }

        let next = RefreshToken::generate();
        let new_hash = self.hash(&next).await?;
        let rotated = self
            .sessions
            .rotate_session(SessionRotation {
                session_id: session.id,
                expected_token_id: session.token_id.clone(),
                expected_hash: session.refresh_token_hash.clone(),
                new_token_id: next.token_id().to_string(),
                new_hash,
                at: Utc::now(),
            })
            .await?;
        if !rotated {
            // Lost the race to a concurrent refresh or revoke
            tracing::warn!(session_id = %session.id, "Refresh rotation lost compare-and-swap");
            return Err(AppError::unauthorized(UnauthorizedReason::InvalidRefresh));
        }

        AuditLog::success("SESSION_ROTATE", "session", "refresh token rotated")
            .with_resource_id(session.id.to_string())
            .with_user_id(user.id)
            .record();

        self.grant(&user, &next)
    }

    /// Revoke the session behind `raw`. Only the token id half is consulted,
    /// and an unknown or already revoked token is still a success.
    #[tracing::instrument(name = "session.logout", skip_all)]
    pub async fn logout(&self, raw: &str) -> Result<(), AppError> {
        let token_id = parse_token_id(raw)?;

        match self.sessions.revoke_by_token_id(token_id, Utc::now()).await? {
            Some(session) => {
                AuditLog::success("SESSION_REVOKE", "session", "logout")
                    .with_resource_id(session.id.to_string())
                    .with_user_id(session.user_id)
                    .with_state_change("active", "revoked")
                    .record();
            }
            None => tracing::debug!("Logout for unknown or revoked session"),
        }
        Ok(())
    }

    /// Public projection of the identity behind an access credential
    pub async fn profile(&self, user_id: UserId) -> Result<PublicUser, AppError> {
        Ok(self.load_user(user_id).await?.to_public())
    }

    async fn load_user(&self, user_id: UserId) -> Result<User, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))
    }

    fn grant(&self, user: &User, refresh_token: &RefreshToken) -> Result<TokenGrant, AppError> {
        Ok(TokenGrant {
            access_token: generate_access_token(user, &self.jwt)?,
            refresh_token: refresh_token.to_string(),
            expires_in: self.jwt.access_token_expiry,
        })
    }

    // bcrypt runs on the blocking pool
    async fn hash(&self, token: &RefreshToken) -> Result<String, AppError> {
        let token = token.clone();
        let cost = self.refresh.bcrypt_cost;
        tokio::task::spawn_blocking(move || token.hash_secret(cost)).await?
    }

    async fn verify(&self, token: &RefreshToken, hash: &str) -> Result<bool, AppError> {
        let token = token.clone();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || token.matches(&hash)).await?
    }
}
