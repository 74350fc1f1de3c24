//! Authentication Routes
//!
//! Registration, login, token refresh, logout and the current user's
//! profile. Input is validated here; the workflows live in
//! [`AuthCoordinator`].

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::AccessClaims;
use crate::coordinator::AuthCoordinator;
use crate::directory::{NewUser, UserPatch};
use crate::error::{AppError, ValidationError};
use crate::validators::{
    validate_email, validate_identifier, validate_non_empty, validate_optional_name,
    validate_optional_phone, validate_password_confirmation, validate_username,
};

/// User registration request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

impl RegisterRequest {
    /// Check every field, reporting all problems at once.
    fn validate(self) -> Result<NewUser, AppError> {
        let mut errors = Vec::new();

        let username = validate_username(&self.username).map_err(|e| errors.push(e));
        let email = validate_email(&self.email).map_err(|e| errors.push(e));
        if let Err(e) = validate_non_empty("password", &self.password) {
            errors.push(e);
        } else if let Err(e) =
            validate_password_confirmation(&self.password, &self.confirm_password)
        {
            errors.push(e);
        }
        let first_name = validate_optional_name("firstName", self.first_name.as_deref())
            .map_err(|e| errors.push(e));
        let last_name = validate_optional_name("lastName", self.last_name.as_deref())
            .map_err(|e| errors.push(e));
        let phone_number =
            validate_optional_phone(self.phone_number.as_deref()).map_err(|e| errors.push(e));

        match (username, email, first_name, last_name, phone_number) {
            (Ok(username), Ok(email), Ok(first_name), Ok(last_name), Ok(phone_number))
                if errors.is_empty() =>
            {
                Ok(NewUser {
                    username,
                    email,
                    password: self.password,
                    first_name,
                    last_name,
                    phone_number,
                })
            }
            _ => Err(errors.into()),
        }
    }
}

/// User login request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Optional logout body
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

/// Profile changes; absent or blank fields are left alone.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

impl UpdateProfileRequest {
    fn validate(self) -> Result<UserPatch, AppError> {
        let mut errors = Vec::new();

        let first_name = validate_optional_name("firstName", self.first_name.as_deref())
            .map_err(|e| errors.push(e));
        let last_name = validate_optional_name("lastName", self.last_name.as_deref())
            .map_err(|e| errors.push(e));
        let phone_number =
            validate_optional_phone(self.phone_number.as_deref()).map_err(|e| errors.push(e));

        match (first_name, last_name, phone_number) {
            (Ok(first_name), Ok(last_name), Ok(phone_number)) => Ok(UserPatch {
                first_name,
                last_name,
                phone_number,
            }),
            _ => Err(errors.into()),
        }
    }
}

/// POST /register
///
/// Create an account and return a token pair for it.
///
/// # Errors
/// - 400: Validation errors (including password policy)
/// - 409: Username or email already registered
/// - 500: Internal server error
pub async fn register(
    form: web::Json<RegisterRequest>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    let new_user = form.into_inner().validate()?;
    let session = coordinator.register(new_user).await?;

    Ok(HttpResponse::Ok().json(session))
}

/// POST /login
///
/// # Errors
/// - 400: Missing identifier or password
/// - 401: Invalid credentials or inactive account. An unknown identifier
///   and a wrong password get the same answer.
/// - 500: Internal server error
pub async fn login(
    form: web::Json<LoginRequest>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    let mut errors = Vec::new();
    let identifier = validate_identifier(&form.username_or_email).map_err(|e| errors.push(e));
    if let Err(e) = validate_non_empty("password", &form.password) {
        errors.push(e);
    }
    let identifier = match identifier {
        Ok(identifier) if errors.is_empty() => identifier,
        _ => return Err(errors.into()),
    };

    let session = coordinator.login(&identifier, &form.password).await?;

    Ok(HttpResponse::Ok().json(session))
}

/// POST /refresh-token
///
/// Rotate a refresh token: the presented one is consumed, a new pair is
/// returned. Replaying a consumed token fails.
///
/// # Errors
/// - 400: Missing refresh token
/// - 401: Unknown, consumed, revoked or expired refresh token
/// - 500: Internal server error
pub async fn refresh_token(
    form: web::Json<RefreshRequest>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    validate_non_empty("refreshToken", &form.refresh_token)?;
    let session = coordinator.refresh(form.refresh_token.trim()).await?;

    Ok(HttpResponse::Ok().json(session))
}

/// POST /logout
///
/// **Requires a valid access token.** Body is optional:
/// `{ "refreshToken": "...", "allDevices": true }`.
pub async fn logout(
    claims: web::ReqData<AccessClaims>,
    body: Option<web::Json<LogoutRequest>>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let refresh_token = request
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let signed_out = coordinator
        .logout(user_id, refresh_token, request.all_devices)
        .await?;

    Ok(HttpResponse::Ok().json(signed_out))
}

/// GET /me
///
/// # Errors
/// - 401: Missing or invalid token (handled by middleware)
/// - 404: User no longer exists or was deactivated
pub async fn me(
    claims: web::ReqData<AccessClaims>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    let user = coordinator.get_user(claims.user_id()?).await?;

    Ok(HttpResponse::Ok().json(user))
}

/// PUT /me
pub async fn update_me(
    claims: web::ReqData<AccessClaims>,
    form: web::Json<UpdateProfileRequest>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    let patch = form.into_inner().validate()?;
    let user = coordinator.update_profile(claims.user_id()?, patch).await?;

    Ok(HttpResponse::Ok().json(user))
}

/// DELETE /me
///
/// Deactivates the account and revokes every refresh token it holds.
/// Access tokens already handed out stay valid until they expire.
pub async fn deactivate_me(
    claims: web::ReqData<AccessClaims>,
    coordinator: web::Data<AuthCoordinator>,
) -> Result<HttpResponse, AppError> {
    coordinator.deactivate(claims.user_id()?).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// Turns extractor failures (malformed JSON, missing fields, bad query
/// strings) into validation errors with the usual error body.
pub fn body_error(field: &str, err: impl std::fmt::Display) -> actix_web::Error {
    AppError::from(ValidationError::Invalid(field.to_string(), err.to_string())).into()
}
