//! Error handling for the identity service.
//!
//! Every failure the service can produce is one of a small set of domain
//! kinds. They are recovered into an [`AppError`] at the coordinator boundary
//! and only turned into HTTP responses by the [`ResponseError`] impl below.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use thiserror::Error;

use crate::logger::current_request_id;

// ============================================================================
// 1. DOMAIN-SPECIFIC ERROR TYPES
// ============================================================================

/// Validation errors for input data, each tied to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    EmptyField(String),
    #[error("{0} is too short (minimum {1} characters)")]
    TooShort(String, usize),
    #[error("{0} is too long (maximum {1} characters)")]
    TooLong(String, usize),
    #[error("{0} has invalid format")]
    InvalidFormat(String),
    #[error("{0} must contain at least one {1}")]
    MissingCharacterClass(String, &'static str),
    #[error("{0} does not match {1}")]
    Mismatch(String, String),
    #[error("{0}: {1}")]
    Invalid(String, String),
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::EmptyField(field)
            | ValidationError::TooShort(field, _)
            | ValidationError::TooLong(field, _)
            | ValidationError::InvalidFormat(field)
            | ValidationError::MissingCharacterClass(field, _)
            | ValidationError::Mismatch(field, _)
            | ValidationError::Invalid(field, _) => field,
        }
    }
}

/// Username or email already held by another record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("username is already registered")]
    UsernameTaken,
    #[error("email is already registered")]
    EmailTaken,
}

/// Authentication and authorization errors.
///
/// `InvalidCredentials` covers both an unknown identifier and a wrong
/// password so callers cannot enumerate accounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account not active")]
    AccountInactive,
    #[error("user not found or inactive")]
    UserUnavailable,
    #[error("missing authentication token")]
    MissingToken,
    #[error("role {0} is required")]
    Forbidden(String),
}

/// Access and refresh token failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token issuer or audience is invalid")]
    BadIssuerAudience,
    #[error("invalid refresh token")]
    RefreshInvalid,
    #[error("refresh token has expired")]
    RefreshExpired,
}

/// Store, signing and hashing failures. Never shown to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(String),
    #[error("database connection error: {0}")]
    ConnectionPool(String),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("password hashing failed: {0}")]
    PasswordHashing(String),
}

impl InfrastructureError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InfrastructureError::Timeout { .. } | InfrastructureError::ConnectionPool(_)
        )
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required config: {0}")]
    MissingRequired(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// 2. UNIFIED APPLICATION ERROR TYPE
// ============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationError>),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Auth(AuthError::Forbidden(_)) => "FORBIDDEN",
            AppError::Auth(AuthError::MissingToken) => "MISSING_TOKEN",
            AppError::Auth(_) => "AUTHENTICATION_FAILED",
            AppError::Token(TokenError::Expired) => "TOKEN_EXPIRED",
            AppError::Token(_) => "TOKEN_INVALID",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(vec![err])
    }
}

impl From<Vec<ValidationError>> for AppError {
    fn from(errors: Vec<ValidationError>) -> Self {
        AppError::Validation(errors)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                // Unique index names are defined in the migrations.
                let message = db_err.message();
                if message.contains("users_email") {
                    AppError::Conflict(ConflictError::EmailTaken)
                } else if message.contains("users_username") {
                    AppError::Conflict(ConflictError::UsernameTaken)
                } else {
                    AppError::Infrastructure(InfrastructureError::Database(err.to_string()))
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Infrastructure(InfrastructureError::ConnectionPool(err.to_string()))
            }
            _ => AppError::Infrastructure(InfrastructureError::Database(err.to_string())),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Field-level validation message
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldMessage {
    pub field: String,
    pub message: String,
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Request id the failure happened under
    pub error_id: String,
    pub message: String,
    pub code: String,
    pub status: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldMessage>>,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<FieldMessage>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let message = match self {
            // Internals stay in the server log.
            AppError::Infrastructure(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = ErrorResponse::new(
            request_id.to_string(),
            message,
            self.code().to_string(),
            status.as_u16(),
        );

        if let AppError::Validation(errors) = self {
            response = response.with_details(
                errors
                    .iter()
                    .map(|e| FieldMessage {
                        field: e.field().to_string(),
                        message: e.to_string(),
                    })
                    .collect(),
            );
        }

        (status, response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(_) => {
                tracing::warn!(request_id = request_id, error = %self, "Validation error");
            }
            AppError::Conflict(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Duplicate registration attempt");
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Token(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Token rejected");
            }
            AppError::NotFound(what) => {
                tracing::info!(request_id = request_id, resource = %what, "Resource not found");
            }
            AppError::Infrastructure(e) => {
                tracing::error!(
                    request_id = request_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Infrastructure error"
                );
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = current_request_id();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Auth(AuthError::Forbidden(_)) => StatusCode::FORBIDDEN,
            AppError::Auth(_) | AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Infrastructure(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
