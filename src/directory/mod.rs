//! User directory: user records, roles and credential checks.
//!
//! Usernames and emails are unique case-insensitively across every record,
//! deactivated ones included, since users are only ever soft-deleted.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryUserDirectory;
pub use postgres::PgUserDirectory;

/// Role every new account receives.
pub const DEFAULT_ROLE: &str = "User";
pub const ADMIN_ROLE: &str = "Admin";

/// A stored user. Never serialized as-is: it carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Registration data as handed to the directory. The password is still in
/// clear here; the directory applies its policy and hashes it.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Profile changes. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// What clients get to see of a user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProjection {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub roles: Vec<String>,
}

impl UserProjection {
    pub fn new(user: &User, roles: Vec<String>) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone_number: user.phone_number.clone(),
            roles,
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Case-insensitive lookup by username, then by email. Inactive users
    /// are returned too; callers decide what an inactive account may do.
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn username_exists(&self, username: &str) -> Result<bool, AppError>;

    async fn email_exists(&self, email: &str) -> Result<bool, AppError>;

    /// Persist a new active user holding [`DEFAULT_ROLE`]. The user and the
    /// role assignment are written together or not at all.
    ///
    /// # Errors
    /// - `Validation` when the password policy rejects the password
    /// - `Conflict` when the username or email is already registered
    async fn create(&self, new_user: NewUser) -> Result<User, AppError>;

    /// # Errors
    /// `NotFound` if the user or the role does not exist
    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AppError>;

    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;

    /// Apply `patch` to an active user. `None` if there is no such user.
    async fn update(&self, user_id: Uuid, patch: UserPatch) -> Result<Option<User>, AppError>;

    /// Soft-delete. Returns false when the user is missing or already inactive.
    async fn deactivate(&self, user_id: Uuid) -> Result<bool, AppError>;

    /// Active users ordered by creation time, `page` starting at 1.
    async fn list_active(&self, page: u32, page_size: u32) -> Result<Vec<User>, AppError>;

    /// Constant-time bcrypt comparison, off the request thread.
    async fn verify_password(&self, user: &User, password: &str) -> Result<bool, AppError> {
        crate::auth::verify_password(password, &user.password_hash).await
    }

    /// Spend the bcrypt work of a verification when no user matched, so an
    /// unknown identifier takes as long to reject as a wrong password.
    async fn verify_password_for_unknown_user(&self, password: &str) -> Result<(), AppError>;
}

pub(crate) fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.max(1) - 1) * u64::from(page_size)
}
