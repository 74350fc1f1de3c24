//! Session workflows: register, login, refresh, logout and the profile
//! operations behind `/me` and `/users`.
//!
//! The coordinator owns no state of its own. Everything it knows lives in
//! the injected stores, so any number of workers can share one instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::{RefreshTokenStore, TokenIssuer};
use crate::directory::{NewUser, User, UserDirectory, UserPatch, UserProjection};
use crate::error::{
    AppError, AuthError, ConflictError, InfrastructureError, TokenError, ValidationError,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Token pair plus the user it was issued to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry
    pub expires_at: DateTime<Utc>,
    pub user: UserProjection,
}

#[derive(Clone)]
pub struct AuthCoordinator {
    directory: Arc<dyn UserDirectory>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    issuer: Arc<TokenIssuer>,
    store_timeout: Duration,
}

impl AuthCoordinator {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        issuer: Arc<TokenIssuer>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            refresh_tokens,
            issuer,
            store_timeout,
        }
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    /// Create an account with the default role and log it straight in.
    ///
    /// # Errors
    /// - `Conflict` if the username or email is taken
    /// - `Validation` with every reason the password policy gave
    pub async fn register(&self, new_user: NewUser) -> Result<AuthSession, AppError> {
        if self
            .guarded("username_exists", self.directory.username_exists(&new_user.username))
            .await?
        {
            return Err(ConflictError::UsernameTaken.into());
        }
        if self
            .guarded("email_exists", self.directory.email_exists(&new_user.email))
            .await?
        {
            return Err(ConflictError::EmailTaken.into());
        }

        let username = new_user.username.clone();
        let password = new_user.password.clone();

        let user = self
            .guarded("create_user", self.directory.create(new_user))
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");

        self.login(&username, &password).await
    }

    /// # Errors
    /// `Auth(InvalidCredentials)` for an unknown identifier or a wrong
    /// password alike, `Auth(AccountInactive)` for a deactivated account.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<AuthSession, AppError> {
        let user = match self
            .guarded(
                "find_user",
                self.directory.find_by_username_or_email(identifier),
            )
            .await?
        {
            Some(user) => user,
            None => {
                self.guarded(
                    "verify_password",
                    self.directory.verify_password_for_unknown_user(password),
                )
                .await?;
                tracing::warn!("Login failed: unknown identifier");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login attempt on inactive account");
            return Err(AuthError::AccountInactive.into());
        }

        let password_valid = self
            .guarded(
                "verify_password",
                self.directory.verify_password(&user, password),
            )
            .await?;
        if !password_valid {
            tracing::warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let session = self.open_session(&user).await?;
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(session)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token is consumed before anything else is checked, so
    /// it is dead afterwards whatever the outcome.
    ///
    /// # Errors
    /// - `Token(RefreshInvalid)` if no active record matched
    /// - `Token(RefreshExpired)` if the record had run out
    /// - `Auth(UserUnavailable)` if its owner is gone or inactive
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AppError> {
        let consumed = self
            .guarded(
                "consume_refresh_token",
                self.refresh_tokens.consume(refresh_token),
            )
            .await?
            .ok_or_else(|| {
                tracing::warn!("Refresh with unknown or already used token");
                TokenError::RefreshInvalid
            })?;

        if consumed.is_expired() {
            tracing::info!(user_id = %consumed.user_id, "Refresh with expired token");
            return Err(TokenError::RefreshExpired.into());
        }

        let user = self
            .guarded("find_user", self.directory.find_by_id(consumed.user_id))
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::UserUnavailable)?;

        let session = self.open_session(&user).await?;
        tracing::info!(user_id = %user.id, "Tokens refreshed");

        Ok(session)
    }

    /// Sign `user_id` out. Revokes `refresh_token` if given and owned by
    /// the user, or every active token of the user when `all_devices` is set.
    ///
    /// Returns false when the user does not exist.
    pub async fn logout(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
        all_devices: bool,
    ) -> Result<bool, AppError> {
        let exists = self
            .guarded("find_user", self.directory.find_by_id(user_id))
            .await?
            .is_some();
        if !exists {
            tracing::warn!(user_id = %user_id, "Logout for unknown user");
            return Ok(false);
        }

        if all_devices {
            let revoked = self
                .guarded(
                    "revoke_refresh_tokens",
                    self.refresh_tokens.revoke_all_for_user(user_id),
                )
                .await?;
            tracing::info!(user_id = %user_id, revoked, "User logged out everywhere");
        } else if let Some(token) = refresh_token {
            let revoked = self
                .guarded(
                    "revoke_refresh_token",
                    self.refresh_tokens.revoke_for_user(user_id, token),
                )
                .await?;
            tracing::info!(user_id = %user_id, revoked, "User logged out");
        } else {
            tracing::info!(user_id = %user_id, "User logged out");
        }

        Ok(true)
    }

    /// # Errors
    /// `NotFound` for a missing or inactive user.
    pub async fn get_user(&self, user_id: Uuid) -> Result<UserProjection, AppError> {
        let user = self.active_user(user_id).await?;
        self.project(&user).await
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        patch: UserPatch,
    ) -> Result<UserProjection, AppError> {
        let user = self
            .guarded("update_user", self.directory.update(user_id, patch))
            .await?
            .ok_or_else(|| AppError::NotFound("user".to_string()))?;

        tracing::info!(user_id = %user_id, "Profile updated");
        self.project(&user).await
    }

    /// Soft-delete the user and revoke all of their refresh tokens.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<(), AppError> {
        let deactivated = self
            .guarded("deactivate_user", self.directory.deactivate(user_id))
            .await?;
        if !deactivated {
            return Err(AppError::NotFound("user".to_string()));
        }

        let revoked = self
            .guarded(
                "revoke_refresh_tokens",
                self.refresh_tokens.revoke_all_for_user(user_id),
            )
            .await?;
        tracing::info!(user_id = %user_id, revoked, "User deactivated");

        Ok(())
    }

    /// Active users, `page` starting at 1.
    pub async fn list_users(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<UserProjection>, AppError> {
        let mut errors = Vec::new();
        if page < 1 {
            errors.push(ValidationError::Invalid(
                "page".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            errors.push(ValidationError::Invalid(
                "pageSize".to_string(),
                format!("must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let users = self
            .guarded("list_users", self.directory.list_active(page, page_size))
            .await?;

        let mut projections = Vec::with_capacity(users.len());
        for user in &users {
            projections.push(self.project(user).await?);
        }
        Ok(projections)
    }

    async fn open_session(&self, user: &User) -> Result<AuthSession, AppError> {
        let roles = self
            .guarded("roles_of", self.directory.roles_of(user.id))
            .await?;
        let access = self.issuer.issue_access_token(user, &roles)?;
        let refresh_token = self
            .guarded("issue_refresh_token", self.refresh_tokens.issue(user.id))
            .await?;

        Ok(AuthSession {
            access_token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            user: UserProjection::new(user, roles),
        })
    }

    async fn active_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.guarded("find_user", self.directory.find_by_id(user_id))
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::NotFound("user".to_string()))
    }

    async fn project(&self, user: &User) -> Result<UserProjection, AppError> {
        let roles = self
            .guarded("roles_of", self.directory.roles_of(user.id))
            .await?;
        Ok(UserProjection::new(user, roles))
    }

    /// Run a store call under the configured deadline.
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, "Store call timed out");
                Err(InfrastructureError::Timeout { operation }.into())
            }
        }
    }
}
