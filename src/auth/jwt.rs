/// Credential Signer
///
/// Mints and verifies the short-lived HS256 access credential. There is no
/// revocation list: access credentials are revoked by expiring.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::AppError;
use crate::models::User;

/// Sign an access credential for `user`
///
/// # Errors
/// Returns `AppError::Internal` if encoding fails
pub fn generate_access_token(user: &User, config: &JwtSettings) -> Result<String, AppError> {
    let claims = Claims::for_user(user, config.access_token_expiry, config.issuer.clone());
    sign_claims(&claims, config)
}

pub(crate) fn sign_claims(claims: &Claims, config: &JwtSettings) -> Result<String, AppError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Validate an access credential and return its claims
///
/// # Errors
/// `Unauthorized(token_expired)` once `exp` has passed,
/// `Unauthorized(invalid_signature)` for anything else that fails validation
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("Access credential rejected: {}", e);
        AppError::from(e)
    })
}
