//! Password Hashing and Verification
//!
//! Handles password hashing with bcrypt and password strength validation.
//! bcrypt is deliberately slow, so both hashing and verification run on the
//! blocking thread pool instead of the request's worker thread.

use bcrypt::{hash, verify};

use crate::error::{AppError, InfrastructureError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Validate password strength, reporting every violated rule.
///
/// Requirements:
/// - 8 to 128 characters
/// - At least one digit
/// - At least one lowercase letter
/// - At least one uppercase letter
pub fn validate_password_strength(password: &str) -> Result<(), Vec<ValidationError>> {
    let field = || "password".to_string();
    let mut errors = Vec::new();

    if password.len() < MIN_PASSWORD_LENGTH {
        errors.push(ValidationError::TooShort(field(), MIN_PASSWORD_LENGTH));
    }
    // bcrypt only looks at the first 72 bytes; the cap also bounds hashing work
    if password.len() > MAX_PASSWORD_LENGTH {
        errors.push(ValidationError::TooLong(field(), MAX_PASSWORD_LENGTH));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(ValidationError::MissingCharacterClass(field(), "digit"));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push(ValidationError::MissingCharacterClass(
            field(),
            "lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push(ValidationError::MissingCharacterClass(
            field(),
            "uppercase letter",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check the policy, then hash with bcrypt at the given cost.
///
/// # Errors
/// - `AppError::Validation` listing every policy violation
/// - `AppError::Infrastructure` if bcrypt fails
/// - `AppError::Internal` if the blocking task panicked or was cancelled
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    validate_password_strength(password)?;

    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(blocking_task_failed)?
        .map_err(|e| InfrastructureError::PasswordHashing(e.to_string()).into())
}

/// Verify a password against its bcrypt hash.
///
/// bcrypt recomputes the digest and compares it in constant time, so the
/// elapsed time does not depend on how much of the hash matched.
pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();

    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(blocking_task_failed)?
        .map_err(|e| InfrastructureError::PasswordHashing(e.to_string()).into())
}

/// Run one bcrypt round at `cost` and throw the result away.
///
/// Costs what [`verify_password`] costs against a hash of the same cost, for
/// login attempts where there is no stored hash to compare with.
pub async fn dummy_verify(password: &str, cost: u32) -> Result<(), AppError> {
    let password = password.to_string();

    tokio::task::spawn_blocking(move || {
        let _ = hash(password, cost);
    })
    .await
    .map_err(blocking_task_failed)
}

fn blocking_task_failed(e: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("password hashing task failed: {}", e))
}
