//! Postgres storage implementation
//!
//! Conditional writes are expressed as single `UPDATE ... WHERE` statements so
//! the database serialises racing requests on the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeviceLogin, SessionStore, StoreResult, UserStore, VerificationStart};
use crate::configuration::DatabaseSettings;
use crate::error::AppError;
use crate::models::{
    Device, OutcomeWrite, Platform, Session, SessionId, SessionRotation, User, UserId,
    VerificationMethod, VerificationOutcome, VerificationRecord, VerificationStatus,
};

const USER_COLUMNS: &str = r#"
    id, full_name, phone, roles, is_active,
    verification_status, correlation_token, check_url, verification_attempts,
    subject_phone, verification_method, verification_started_at, verified_at,
    raw_response, last_login_at, created_at, updated_at
"#;

const SESSION_COLUMNS: &str = r#"
    id, user_id, device_id, token_id, refresh_token_hash,
    issued_at, last_seen_at, revoked_at, ip, user_agent
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    full_name: String,
    phone: String,
    roles: Vec<String>,
    is_active: bool,
    verification_status: String,
    correlation_token: Option<String>,
    check_url: Option<String>,
    verification_attempts: i32,
    subject_phone: Option<String>,
    verification_method: Option<String>,
    verification_started_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    raw_response: Option<serde_json::Value>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, devices: Vec<Device>) -> Result<User, AppError> {
        Ok(User {
            id: self.id,
            full_name: self.full_name,
            phone: self.phone,
            roles: self.roles,
            is_active: self.is_active,
            verification: VerificationRecord {
                status: VerificationStatus::parse(&self.verification_status)?,
                correlation_token: self.correlation_token,
                check_url: self.check_url,
                attempts: self.verification_attempts,
                subject_phone: self.subject_phone,
                method: self
                    .verification_method
                    .as_deref()
                    .and_then(VerificationMethod::parse),
                started_at: self.verification_started_at,
                verified_at: self.verified_at,
                raw_response: self.raw_response,
            },
            devices,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    platform: String,
    last_seen_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    device_id: Option<String>,
    token_id: String,
    refresh_token_hash: String,
    issued_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    ip: Option<String>,
    user_agent: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            device_id: row.device_id,
            token_id: row.token_id,
            refresh_token_hash: row.refresh_token_hash,
            issued_at: row.issued_at,
            last_seen_at: row.last_seen_at,
            revoked_at: row.revoked_at,
            ip: row.ip,
            user_agent: row.user_agent,
        }
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.connection_string())
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn devices_for(&self, user_id: UserId) -> StoreResult<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, platform, last_seen_at
            FROM user_devices
            WHERE user_id = $1
            ORDER BY last_seen_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let platform = Platform::parse(&row.platform).map_err(|_| {
                    AppError::Internal(format!("unknown platform stored: {}", row.platform))
                })?;
                Ok(Device {
                    device_id: row.device_id,
                    platform,
                    last_seen_at: row.last_seen_at,
                })
            })
            .collect()
    }

    async fn hydrate(&self, row: Option<UserRow>) -> StoreResult<Option<User>> {
        match row {
            Some(row) => {
                let devices = self.devices_for(row.id).await?;
                Ok(Some(row.into_user(devices)?))
            }
            None => Ok(None),
        }
    }

    async fn find_user_where(&self, predicate: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, predicate);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        self.find_user_where("phone", phone).await
    }

    async fn find_by_correlation_token(&self, token: &str) -> StoreResult<Option<User>> {
        self.find_user_where("correlation_token", token).await
    }

    async fn begin_verification(&self, start: VerificationStart) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (
                id, full_name, phone, verification_status, correlation_token, check_url,
                verification_attempts, subject_phone, verification_started_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, 1, $3, $6, $6, $6)
            ON CONFLICT (phone) DO UPDATE SET
                verification_status = 'pending',
                correlation_token = EXCLUDED.correlation_token,
                check_url = EXCLUDED.check_url,
                verification_attempts = users.verification_attempts + 1,
                subject_phone = EXCLUDED.subject_phone,
                verification_started_at = EXCLUDED.verification_started_at,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let full_name = start
            .full_name
            .unwrap_or_else(|| crate::models::DEFAULT_DISPLAY_NAME.to_string());
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(full_name)
            .bind(&start.phone)
            .bind(&start.correlation_token)
            .bind(&start.check_url)
            .bind(start.at)
            .fetch_one(&self.pool)
            .await?;

        let devices = self.devices_for(row.id).await?;
        row.into_user(devices)
    }

    async fn apply_verification_outcome(
        &self,
        user_id: UserId,
        correlation_token: &str,
        outcome: VerificationOutcome,
    ) -> StoreResult<OutcomeWrite> {
        let sql = if outcome.verified {
            r#"
            UPDATE users SET
                verification_status = 'verified',
                correlation_token = NULL,
                verified_at = COALESCE(verified_at, $3),
                verification_method = $4,
                raw_response = $5,
                updated_at = $3
            WHERE id = $1 AND correlation_token = $2
            "#
        } else {
            r#"
            UPDATE users SET
                verification_status = 'failed',
                verification_method = $4,
                raw_response = $5,
                updated_at = $3
            WHERE id = $1 AND correlation_token = $2 AND verification_status <> 'verified'
            "#
        };

        let result = sqlx::query(sql)
            .bind(user_id)
            .bind(correlation_token)
            .bind(outcome.at)
            .bind(outcome.method.as_str())
            .bind(outcome.raw_response)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(OutcomeWrite::Applied);
        }

        let status = sqlx::query_scalar::<_, String>(
            "SELECT verification_status FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match status.as_deref() {
            Some("verified") => OutcomeWrite::AlreadyVerified,
            _ => OutcomeWrite::Superseded,
        })
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                verification_status = 'expired',
                correlation_token = NULL,
                updated_at = $2
            WHERE verification_status = 'pending' AND verification_started_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_login(
        &self,
        user_id: UserId,
        device: Option<DeviceLogin>,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        if let Some(device) = device {
            sqlx::query(
                r#"
                INSERT INTO user_devices (user_id, device_id, platform, last_seen_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id, device_id) DO UPDATE SET last_seen_at = EXCLUDED.last_seen_at
                "#,
            )
            .bind(user_id)
            .bind(&device.device_id)
            .bind(device.platform.as_str())
            .bind(at)
            .execute(&mut tx)
            .await?;
        }

        let updated = sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&mut tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::not_found("user"));
        }

        tx.commit().await?;

        self.find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, device_id, token_id, refresh_token_hash,
                issued_at, last_seen_at, revoked_at, ip, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.device_id)
        .bind(&session.token_id)
        .bind(&session.refresh_token_hash)
        .bind(session.issued_at)
        .bind(session.last_seen_at)
        .bind(session.revoked_at)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_token_id(&self, token_id: &str) -> StoreResult<Option<Session>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE token_id = $1
            ORDER BY (revoked_at IS NULL) DESC, issued_at DESC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Session::from))
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                token_id = $1,
                refresh_token_hash = $2,
                last_seen_at = $3
            WHERE id = $4
              AND token_id = $5
              AND refresh_token_hash = $6
              AND revoked_at IS NULL
            "#,
        )
        .bind(&rotation.new_token_id)
        .bind(&rotation.new_hash)
        .bind(rotation.at)
        .bind(rotation.session_id)
        .bind(&rotation.expected_token_id)
        .bind(&rotation.expected_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_session(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_by_token_id(
        &self,
        token_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let sql = format!(
            r#"
            UPDATE sessions SET revoked_at = $2
            WHERE token_id = $1 AND revoked_at IS NULL
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(token_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Session::from))
    }
}
