/// Authentication Routes
///
/// Login for verified phones, refresh-token rotation, logout and the current
/// identity.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::Claims;
use crate::error::{AppError, ErrorContext, ValidationError};
use crate::session::{ClientMetadata, SessionManager};

/// Device details sent by the app at login
#[derive(Deserialize)]
pub struct DeviceInfo {
    pub platform: Option<String>,
}

/// Login request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub phone: String,
    pub device_id: Option<String>,
    pub device_info: Option<DeviceInfo>,
}

/// Refresh / logout request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

impl RefreshRequest {
    fn token(&self) -> Result<&str, AppError> {
        self.refresh_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ValidationError::EmptyField("refreshToken".to_string()).into())
    }
}

fn client_metadata(req: &HttpRequest) -> ClientMetadata {
    let ip = req
        .connection_info()
        .realip_remote_addr()
        .map(str::to_string);
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    ClientMetadata { ip, user_agent }
}

/// POST /api/auth/login
///
/// Opens a session for a phone whose verification has completed.
/// Returns `{ accessToken, refreshToken, expiresIn, user }`.
///
/// # Errors
/// - 400: Malformed phone, device id or platform
/// - 401: `phone_not_verified` / `account_inactive`
/// - 404: No identity for this phone
pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("login");
    let platform = body.device_info.as_ref().and_then(|d| d.platform.as_deref());

    let grant = sessions
        .login(
            &body.phone,
            body.device_id.as_deref(),
            platform,
            client_metadata(&req),
        )
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %grant.user.id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok().json(grant))
}

/// POST /api/auth/refresh
///
/// Rotates the presented refresh token. The old token stops working as soon
/// as this call succeeds.
///
/// # Errors
/// - 400: `invalid_refresh_format`
/// - 401: `invalid_refresh` (unknown token, wrong secret, lost a concurrent rotation)
/// - 404: Session has been revoked
pub async fn refresh(
    body: web::Json<RefreshRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let grant = sessions.refresh(body.token()?).await?;
    Ok(HttpResponse::Ok().json(grant))
}

/// POST /api/auth/logout
///
/// Always `{ ok: true }` for a well-formed token, known or not.
pub async fn logout(
    body: web::Json<RefreshRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    sessions.logout(body.token()?).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

/// GET /api/me
///
/// **Requires** `Authorization: Bearer <access_token>`; claims are injected
/// by `JwtMiddleware`.
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let user = sessions.profile(user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}
