//! Access token claims.
//!
//! Registered claims (RFC 7519) plus the profile facts downstream services
//! read without calling back: username, email, given/family name and one
//! `role` entry per assigned role.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::User;
use crate::error::TokenError;

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Username
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    /// One entry per assigned role
    #[serde(default)]
    pub role: Vec<String>,
    pub iss: String,
    pub aud: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token id, keeps two tokens minted in the same second distinct
    pub jti: String,
}

impl AccessClaims {
    pub fn new(
        user: &User,
        roles: &[String],
        issuer: &str,
        audience: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            sub: user.id.to_string(),
            name: user.username.clone(),
            email: user.email.clone(),
            given_name: user.first_name.clone().unwrap_or_default(),
            family_name: user.last_name.clone().unwrap_or_default(),
            role: roles.to_vec(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: expires_at,
            iat: issued_at,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}
