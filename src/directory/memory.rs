use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{page_offset, NewUser, User, UserDirectory, UserPatch, ADMIN_ROLE, DEFAULT_ROLE};
use crate::auth::{dummy_verify, hash_password};
use crate::error::{AppError, ConflictError, InfrastructureError};

#[derive(Default)]
struct DirectoryState {
    users: HashMap<Uuid, User>,
    roles: Vec<String>,
    assignments: HashMap<Uuid, BTreeSet<String>>,
}

/// In-memory user directory for tests and local runs.
///
/// Same contract as the Postgres directory, including case-insensitive
/// uniqueness checked under the same lock as the insert.
pub struct InMemoryUserDirectory {
    state: Mutex<DirectoryState>,
    password_hash_cost: u32,
}

impl InMemoryUserDirectory {
    /// Seeded with the `Admin` and `User` roles.
    pub fn new(password_hash_cost: u32) -> Self {
        let state = DirectoryState {
            roles: vec![ADMIN_ROLE.to_string(), DEFAULT_ROLE.to_string()],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            password_hash_cost,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, DirectoryState>, AppError> {
        self.state.lock().map_err(|_| {
            InfrastructureError::Database("in-memory directory lock poisoned".to_string()).into()
        })
    }
}

fn same(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError> {
        let state = self.state()?;
        let by_username = state.users.values().find(|u| same(&u.username, identifier));
        let found = by_username.or_else(|| state.users.values().find(|u| same(&u.email, identifier)));
        Ok(found.cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.state()?.users.get(&user_id).cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AppError> {
        Ok(self
            .state()?
            .users
            .values()
            .any(|u| same(&u.username, username)))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        Ok(self.state()?.users.values().any(|u| same(&u.email, email)))
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        let password_hash = hash_password(&new_user.password, self.password_hash_cost).await?;

        let mut state = self.state()?;
        if state.users.values().any(|u| same(&u.username, &new_user.username)) {
            return Err(ConflictError::UsernameTaken.into());
        }
        if state.users.values().any(|u| same(&u.email, &new_user.email)) {
            return Err(ConflictError::EmailTaken.into());
        }
        let default_role = state
            .roles
            .iter()
            .find(|r| same(r, DEFAULT_ROLE))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("role {}", DEFAULT_ROLE)))?;

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone_number: new_user.phone_number,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        state.users.insert(user.id, user.clone());
        state
            .assignments
            .entry(user.id)
            .or_default()
            .insert(default_role);

        Ok(user)
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        let role = state
            .roles
            .iter()
            .find(|r| same(r, role_name))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("role {}", role_name)))?;
        if !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound("user".to_string()));
        }

        state.assignments.entry(user_id).or_default().insert(role);
        Ok(())
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        Ok(self
            .state()?
            .assignments
            .get(&user_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn update(&self, user_id: Uuid, patch: UserPatch) -> Result<Option<User>, AppError> {
        let mut state = self.state()?;
        let Some(user) = state.users.get_mut(&user_id).filter(|u| u.is_active) else {
            return Ok(None);
        };

        if let Some(first_name) = patch.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = patch.last_name {
            user.last_name = Some(last_name);
        }
        if let Some(phone_number) = patch.phone_number {
            user.phone_number = Some(phone_number);
        }
        user.updated_at = Some(Utc::now());

        Ok(Some(user.clone()))
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.users.get_mut(&user_id) {
            Some(user) if user.is_active => {
                let now = Utc::now();
                user.is_active = false;
                user.updated_at = Some(now);
                user.deleted_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active(&self, page: u32, page_size: u32) -> Result<Vec<User>, AppError> {
        let state = self.state()?;
        let mut users: Vec<&User> = state.users.values().filter(|u| u.is_active).collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(users
            .into_iter()
            .skip(page_offset(page, page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn verify_password_for_unknown_user(&self, password: &str) -> Result<(), AppError> {
        dummy_verify(password, self.password_hash_cost).await
    }
}
