//! Identity-token verification for WebSocket commands.
//!
//! Tokens are HS256 JWTs carrying the account username. When no secret is
//! configured the verifier is a pass-through, for local development and
//! tests.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Claims carried by a command token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Account username; joined with `account_type` to form the session id.
    pub username: String,
    /// Issuing system's user row id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Expiry, unix seconds.
    pub exp: u64,
}

/// Verifies command tokens against the configured secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Option<String>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Whether verification is enforced.
    #[must_use]
    pub fn enforced(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `token` and return its claims.
    ///
    /// With no secret configured, returns `Ok(None)` whatever the token.
    /// With a secret, a missing or invalid token is an error.
    pub fn verify(&self, token: Option<&str>) -> Result<Option<Claims>, ServerError> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Err(ServerError::Token("token is required".into()));
        };
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| ServerError::Token(e.to_string()))?;
        Ok(Some(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn mint(secret: &str, username: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as u64;
        let claims = Claims {
            username: username.into(),
            id: Some(7),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn no_secret_is_a_pass_through() {
        let verifier = TokenVerifier::new(None);
        assert!(!verifier.enforced());
        assert!(verifier.verify(None).unwrap().is_none());
        assert!(verifier.verify(Some("garbage")).unwrap().is_none());
    }

    #[test]
    fn valid_token_yields_claims() {
        let verifier = TokenVerifier::new(Some("s3cret".into()));
        let token = mint("s3cret", "alice", 3600);
        let claims = verifier.verify(Some(&token)).unwrap().unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.id, Some(7));
    }

    #[test]
    fn missing_token_is_rejected_when_enforced() {
        let verifier = TokenVerifier::new(Some("s3cret".into()));
        let err = verifier.verify(None).unwrap_err();
        assert_eq!(err.code(), "auth_failure");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = TokenVerifier::new(Some("s3cret".into()));
        let token = mint("other", "alice", 3600);
        assert!(verifier.verify(Some(&token)).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new(Some("s3cret".into()));
        let token = mint("s3cret", "alice", -3600);
        assert!(verifier.verify(Some(&token)).is_err());
    }
}
