/// Refresh Token Codec
///
/// A refresh token handed to clients is `<tokenId>.<secret>`:
/// - `tokenId`: 8 random bytes, hex. Stored in clear as the session lookup key.
/// - `secret`: 48 random bytes, hex. Only its bcrypt hash is ever stored.
///
/// Hex never produces `.`, so the delimiter is unambiguous.

use std::fmt;

use rand::{thread_rng, RngCore};

use crate::error::{AppError, ValidationError};

pub const TOKEN_ID_BYTES: usize = 8;
pub const SECRET_BYTES: usize = 48;
const DELIMITER: char = '.';

/// Hex-encode `len` bytes from the thread-local CSPRNG
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    token_id: String,
    secret: String,
}

impl RefreshToken {
    /// Generate a fresh token pair
    pub fn generate() -> Self {
        Self {
            token_id: random_hex(TOKEN_ID_BYTES),
            secret: random_hex(SECRET_BYTES),
        }
    }

    /// Parse the wire form `<tokenId>.<secret>`
    ///
    /// # Errors
    /// `ValidationError::MalformedRefreshToken` if either half is missing
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let (token_id, secret) = raw
            .trim()
            .split_once(DELIMITER)
            .ok_or(ValidationError::MalformedRefreshToken)?;

        if token_id.is_empty() || secret.is_empty() || secret.contains(DELIMITER) {
            return Err(ValidationError::MalformedRefreshToken.into());
        }

        Ok(Self {
            token_id: token_id.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Salted bcrypt hash of the secret half
    pub fn hash_secret(&self, cost: u32) -> Result<String, AppError> {
        Ok(bcrypt::hash(&self.secret, cost)?)
    }

    /// Compare the secret half against a stored hash
    pub fn matches(&self, hash: &str) -> Result<bool, AppError> {
        Ok(bcrypt::verify(&self.secret, hash)?)
    }
}

/// Extract only the `tokenId` half. Used by logout, which does not need the
/// secret.
pub fn parse_token_id(raw: &str) -> Result<&str, AppError> {
    let token_id = raw.trim().split(DELIMITER).next().unwrap_or_default();
    if token_id.is_empty() {
        return Err(ValidationError::MalformedRefreshToken.into());
    }
    Ok(token_id)
}

impl fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.token_id, DELIMITER, self.secret)
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("token_id", &self.token_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
