//! Bearer-token verification.
//!
//! Tokens arrive as a `?token=` query parameter on websocket connect.
//! They are opaque to the rest of the runtime; verification yields the
//! session identity `{user_id, email?, is_admin?}`. Credential issuance
//! lives elsewhere.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use waymark_domain::UserId;

/// Errors from token verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// Expiry, seconds since epoch.
    pub exp: u64,
}

/// Verified session identity.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: Option<String>,
    pub is_admin: bool,
}

/// HS256 verifier over a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        Ok(AuthenticatedUser {
            user_id: UserId::new(data.claims.sub),
            email: data.claims.email,
            is_admin: data.claims.is_admin,
        })
    }
}
