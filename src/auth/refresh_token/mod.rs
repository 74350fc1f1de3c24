//! Refresh Token Management
//!
//! Refresh tokens are:
//! - 64 random bytes, URL-safe base64 without padding
//! - Stored only as their SHA-256 hash (never plaintext)
//! - Single-use: consuming one is an atomic compare-and-set on the
//!   active flag, so concurrent refreshes of the same value yield one winner
//! - Never deleted, only deactivated, and never reactivated

mod memory;
mod postgres;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryRefreshTokenStore;
pub use postgres::PgRefreshTokenStore;

const TOKEN_BYTES: usize = 64;

/// Generate a new cryptographically secure refresh token value.
///
/// This is what the client holds; the store only ever sees its hash.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest of a token value, the key records are stored under.
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The record a successful [`RefreshTokenStore::consume`] deactivated.
///
/// `expires_at` is reported as stored; an expired record is still consumed
/// and it is up to the caller to reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedToken {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl ConsumedToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist a new active token for `user_id` and return its value.
    ///
    /// Also deactivates that user's expired records that are still flagged
    /// active.
    async fn issue(&self, user_id: Uuid) -> Result<String, AppError>;

    /// Atomically deactivate the active record matching `token`.
    ///
    /// `None` when no active record matched: unknown, already rotated or
    /// already revoked. At most one caller ever gets `Some` for a value.
    async fn consume(&self, token: &str) -> Result<Option<ConsumedToken>, AppError>;

    /// Whether `token` currently matches an active, unexpired record.
    async fn is_active(&self, token: &str) -> Result<bool, AppError>;

    /// Deactivate `token` only if it is an active record owned by `user_id`.
    /// False for anything else, another user's token included.
    async fn revoke_for_user(&self, user_id: Uuid, token: &str) -> Result<bool, AppError>;

    /// Deactivate every active token of `user_id`, returning how many.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// Revoke `token`. Idempotent: unknown or inactive values return false.
    async fn invalidate(&self, token: &str) -> Result<bool, AppError> {
        Ok(self.consume(token).await?.is_some())
    }
}
