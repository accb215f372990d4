/// Input validators for onboarding and login requests
///
/// Phone numbers are the identity key, so they are normalised before any
/// lookup: surrounding whitespace plus inner spaces, dashes and parentheses
/// are removed, the remainder must be an E.164-style number, and the result
/// always carries the leading `+`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_NAME_LENGTH: usize = 256;
const MAX_DEVICE_ID_LENGTH: usize = 128;

lazy_static! {
    // Optional leading '+', 8 to 15 digits, no leading zero
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[1-9][0-9]{7,14}$").unwrap();

    static ref DEVICE_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._:-]+$").unwrap();
}

/// Validates and normalises a phone number
pub fn is_valid_phone(phone: &str) -> Result<String, ValidationError> {
    let normalized: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if normalized.is_empty() {
        return Err(ValidationError::EmptyField("phone".to_string()));
    }

    if !PHONE_REGEX.is_match(&normalized) {
        return Err(ValidationError::InvalidFormat("phone".to_string()));
    }

    if normalized.starts_with('+') {
        Ok(normalized)
    } else {
        Ok(format!("+{}", normalized))
    }
}

/// Validates an optional display name. Blank names count as absent.
pub fn is_valid_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let trimmed = match name.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(trimmed) => trimmed,
    };

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("fullName".to_string(), MAX_NAME_LENGTH));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::SuspiciousContent("fullName".to_string()));
    }

    Ok(Some(trimmed.to_string()))
}

/// Validates an optional client device identifier
pub fn is_valid_device_id(device_id: Option<&str>) -> Result<Option<String>, ValidationError> {
    let trimmed = match device_id.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(trimmed) => trimmed,
    };

    if trimmed.len() > MAX_DEVICE_ID_LENGTH {
        return Err(ValidationError::TooLong(
            "deviceId".to_string(),
            MAX_DEVICE_ID_LENGTH,
        ));
    }

    if !DEVICE_ID_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("deviceId".to_string()));
    }

    Ok(Some(trimmed.to_string()))
}
