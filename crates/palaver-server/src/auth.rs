//! Token verification for the WebSocket handshake.
//!
//! Tokens are issued by the HTTP auth service as HS256 JWTs carrying a
//! `userId` claim and a 7-day expiry. The gateway only needs "token in,
//! user id out", so the contract is a small trait that tests can fake.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Authentication failures are fatal to the connection: the gateway closes
/// with a policy-violation code and never exchanges an envelope.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("token verification failed")]
    InvalidToken,

    #[error("unknown user")]
    UnknownUser,
}

/// `verify(token) -> userId`, the only contract the gateway depends on.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
}

/// HS256 JWT verifier sharing a secret with the token issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AuthError::InvalidToken
            })?;
        Ok(data.claims.user_id)
    }
}
