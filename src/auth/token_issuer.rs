//! Access token issuing and validation.
//!
//! Access tokens are HS256 JWTs verified purely by signature, issuer,
//! audience and expiry. No store lookup is involved.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use uuid::Uuid;

use crate::auth::claims::AccessClaims;
use crate::configuration::JwtSettings;
use crate::directory::User;
use crate::error::{AppError, InfrastructureError, TokenError};

/// A freshly signed access token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and validates access tokens. Holds nothing but key material and
/// the fixed issuer/audience/lifetime, so it is shared freely between workers.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(config: &JwtSettings) -> Self {
        Self::with_lifetime(config, config.access_token_lifetime())
    }

    pub fn with_lifetime(config: &JwtSettings, lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            lifetime,
        }
    }

    /// Sign an access token for `user` carrying one role claim per role.
    ///
    /// # Errors
    /// Returns an infrastructure error if signing fails
    pub fn issue_access_token(
        &self,
        user: &User,
        roles: &[String],
    ) -> Result<IssuedAccessToken, AppError> {
        let now = Utc::now();
        let expires_at = now + self.lifetime;
        let claims = AccessClaims::new(
            user,
            roles,
            &self.issuer,
            &self.audience,
            now.timestamp(),
            expires_at.timestamp(),
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| InfrastructureError::Signing(e.to_string()))?;

        // Report the second-truncated instant actually embedded in the token.
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(expires_at);

        Ok(IssuedAccessToken { token, expires_at })
    }

    /// Validate signature, issuer, audience and expiry (zero leeway).
    pub fn validate(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.decode(token, true)
    }

    /// Recover the subject of a correctly signed token whose lifetime may
    /// already be over.
    ///
    /// Signature, issuer and audience are still enforced. Never use this to
    /// authorize a request; it only answers "who was this token for".
    pub fn extract_subject_ignoring_expiry(&self, token: &str) -> Result<Uuid, TokenError> {
        self.decode(token, false)?.user_id()
    }

    fn decode(&self, token: &str, enforce_expiry: bool) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = enforce_expiry;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let error = match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                        TokenError::BadIssuerAudience
                    }
                    _ => TokenError::Invalid,
                };
                tracing::debug!(error = %e, "Access token rejected");
                error
            })
    }
}
