//! Authentication module
//!
//! Access token issuing/validation, password hashing, and refresh token
//! storage.

mod claims;
mod password;
mod refresh_token;
mod token_issuer;

pub use claims::AccessClaims;
pub use password::{dummy_verify, hash_password, validate_password_strength, verify_password};
pub use refresh_token::{
    generate_refresh_token, ConsumedToken, InMemoryRefreshTokenStore, PgRefreshTokenStore,
    RefreshTokenStore,
};
pub use token_issuer::{IssuedAccessToken, TokenIssuer};
