//! Input validators for the public endpoints.
//!
//! These run in the handlers before anything reaches the coordinator. The
//! password policy lives with the directory (`auth::password`) because it is
//! the directory that refuses to store weak credentials.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 50;
const MAX_NAME_LENGTH: usize = 50;
const MAX_IDENTIFIER_LENGTH: usize = MAX_EMAIL_LENGTH;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");

    static ref USERNAME_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._-]+$").expect("username regex is valid");

    // Optional leading +, then digits with common separators.
    static ref PHONE_REGEX: Regex =
        Regex::new(r"^\+?[0-9][0-9 ()-]{5,19}$").expect("phone regex is valid");
}

/// Validates a username: 3-50 characters of letters, digits, `.`, `_`, `-`.
pub fn validate_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }
    if trimmed.chars().count() < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort(
            "username".to_string(),
            MIN_USERNAME_LENGTH,
        ));
    }
    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong(
            "username".to_string(),
            MAX_USERNAME_LENGTH,
        ));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Validates an email address against a simplified RFC 5322 grammar.
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }
    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Optional first/last name. Blank input counts as absent.
pub fn validate_optional_name(
    field: &str,
    name: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    let Some(trimmed) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_NAME_LENGTH));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat(field.to_string()));
    }

    Ok(Some(trimmed.to_string()))
}

/// Optional phone number. Blank input counts as absent.
pub fn validate_optional_phone(phone: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(trimmed) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    if !PHONE_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("phoneNumber".to_string()));
    }

    Ok(Some(trimmed.to_string()))
}

/// Login identifier: either a username or an email, only bounded here.
pub fn validate_identifier(identifier: &str) -> Result<String, ValidationError> {
    let trimmed = identifier.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("usernameOrEmail".to_string()));
    }
    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(
            "usernameOrEmail".to_string(),
            MAX_IDENTIFIER_LENGTH,
        ));
    }

    Ok(trimmed.to_string())
}

pub fn validate_password_confirmation(
    password: &str,
    confirmation: &str,
) -> Result<(), ValidationError> {
    if password != confirmation {
        return Err(ValidationError::Mismatch(
            "confirmPassword".to_string(),
            "password".to_string(),
        ));
    }
    Ok(())
}

/// Presence check only; the value itself is opaque.
pub fn validate_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }
    Ok(())
}
