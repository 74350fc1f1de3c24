use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{page_offset, NewUser, User, UserDirectory, UserPatch, DEFAULT_ROLE};
use crate::auth::{dummy_verify, hash_password};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
                            phone_number, is_active, created_at, updated_at, deleted_at";

/// PostgreSQL-backed user directory
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
    password_hash_cost: u32,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool, password_hash_cost: u32) -> Self {
        Self {
            pool,
            password_hash_cost,
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError> {
        // A username match wins over an email match.
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE lower(username) = lower($1) OR lower(email) = lower($1)
            ORDER BY (lower(username) = lower($1)) DESC
            LIMIT 1
            "#
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE lower(username) = lower($1))",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE lower(email) = lower($1))",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let password_hash = hash_password(&new_user.password, self.password_hash_cost).await?;

        // Dropping the transaction before commit rolls the user back.
        let mut transaction = self.pool.begin().await?;

        // Unique index violations surface as Conflict via From<sqlx::Error>,
        // which also covers two registrations racing past the exists checks.
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name,
                               phone_number, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8)
            RETURNING {USER_COLUMNS}
            "#
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&password_hash)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(&new_user.phone_number)
            .bind(Utc::now())
            .fetch_one(&mut transaction)
            .await?;

        let assigned = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE lower(name) = lower($2) AND is_active
            "#,
        )
        .bind(user.id)
        .bind(DEFAULT_ROLE)
        .execute(&mut transaction)
        .await?;
        if assigned.rows_affected() != 1 {
            return Err(AppError::NotFound(format!("role {}", DEFAULT_ROLE)));
        }

        transaction.commit().await?;

        Ok(user)
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AppError> {
        let role_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM roles WHERE lower(name) = lower($1) AND is_active",
        )
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("role {}", role_name)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // foreign_key_violation: no such user
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23503") => {
                Err(AppError::NotFound("user".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let roles = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.is_active
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    async fn update(&self, user_id: Uuid, patch: UserPatch) -> Result<Option<User>, AppError> {
        let sql = format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                phone_number = COALESCE($4, phone_number),
                updated_at = $5
            WHERE id = $1 AND is_active
            RETURNING {USER_COLUMNS}
            "#
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(&patch.first_name)
            .bind(&patch.last_name)
            .bind(&patch.phone_number)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<bool, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_active = false, updated_at = $2, deleted_at = $2
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_active(&self, page: u32, page_size: u32) -> Result<Vec<User>, AppError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE is_active
            ORDER BY created_at, id
            LIMIT $1 OFFSET $2
            "#
        );

        let users = sqlx::query_as::<_, User>(&sql)
            .bind(i64::from(page_size))
            .bind(page_offset(page, page_size) as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    async fn verify_password_for_unknown_user(&self, password: &str) -> Result<(), AppError> {
        dummy_verify(password, self.password_hash_cost).await
    }
}
