use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{generate_refresh_token, hash_token, ConsumedToken, RefreshTokenStore};
use crate::error::{AppError, InfrastructureError};

#[derive(Debug, Clone)]
struct TokenRecord {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    is_active: bool,
    revoked_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.revoked_at = Some(now);
    }
}

/// In-memory refresh token store, keyed by token hash like the Postgres one.
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<String, TokenRecord>>,
    ttl: Duration,
}

impl InMemoryRefreshTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<String, TokenRecord>>, AppError> {
        self.records.lock().map_err(|_| {
            InfrastructureError::Database("in-memory token store lock poisoned".to_string()).into()
        })
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let token = generate_refresh_token();
        let now = Utc::now();
        let mut records = self.records()?;

        records
            .values_mut()
            .filter(|r| r.user_id == user_id && r.is_active && r.expires_at <= now)
            .for_each(|r| r.deactivate(now));

        records.insert(
            hash_token(&token),
            TokenRecord {
                user_id,
                expires_at: now + self.ttl,
                is_active: true,
                revoked_at: None,
            },
        );

        Ok(token)
    }

    async fn consume(&self, token: &str) -> Result<Option<ConsumedToken>, AppError> {
        let mut records = self.records()?;
        match records.get_mut(&hash_token(token)) {
            Some(record) if record.is_active => {
                record.deactivate(Utc::now());
                Ok(Some(ConsumedToken {
                    user_id: record.user_id,
                    expires_at: record.expires_at,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn is_active(&self, token: &str) -> Result<bool, AppError> {
        let now = Utc::now();
        Ok(self
            .records()?
            .get(&hash_token(token))
            .map(|r| r.is_active && r.expires_at > now)
            .unwrap_or(false))
    }

    async fn revoke_for_user(&self, user_id: Uuid, token: &str) -> Result<bool, AppError> {
        let mut records = self.records()?;
        match records.get_mut(&hash_token(token)) {
            Some(record) if record.is_active && record.user_id == user_id => {
                record.deactivate(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut revoked = 0;
        for record in self.records()?.values_mut() {
            if record.user_id == user_id && record.is_active {
                record.deactivate(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
