use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{generate_refresh_token, hash_token, ConsumedToken, RefreshTokenStore};
use crate::error::AppError;

/// PostgreSQL-backed refresh token store
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
    ttl: Duration,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let token = generate_refresh_token();
        let now = Utc::now();

        let mut transaction = self.pool.begin().await?;

        let swept = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_active = false, revoked_at = $2
            WHERE user_id = $1 AND is_active AND expires_at <= $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut transaction)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, is_active, created_at)
            VALUES ($1, $2, $3, $4, true, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(now + self.ttl)
        .bind(now)
        .execute(&mut transaction)
        .await?;

        transaction.commit().await?;

        if swept > 0 {
            tracing::debug!(user_id = %user_id, swept, "Expired refresh tokens deactivated");
        }

        Ok(token)
    }

    async fn consume(&self, token: &str) -> Result<Option<ConsumedToken>, AppError> {
        // Single conditional update: of two racing callers only one sees a row.
        let consumed = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            UPDATE refresh_tokens
            SET is_active = false, revoked_at = $2
            WHERE token_hash = $1 AND is_active
            RETURNING user_id, expires_at
            "#,
        )
        .bind(hash_token(token))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(consumed.map(|(user_id, expires_at)| ConsumedToken {
            user_id,
            expires_at,
        }))
    }

    async fn is_active(&self, token: &str) -> Result<bool, AppError> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM refresh_tokens
                WHERE token_hash = $1 AND is_active AND expires_at > $2
            )
            "#,
        )
        .bind(hash_token(token))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }

    async fn revoke_for_user(&self, user_id: Uuid, token: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_active = false, revoked_at = $3
            WHERE token_hash = $1 AND user_id = $2 AND is_active
            "#,
        )
        .bind(hash_token(token))
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_active = false, revoked_at = $1
            WHERE user_id = $2 AND is_active
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
