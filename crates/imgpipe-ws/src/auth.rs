//! Token validation for `join` requests
//!
//! A client proves who it is by sending a `join` message with an access or
//! refresh token. The validator turns the token into a [`UserId`]; the
//! session then registers the connection under that user.

use imgpipe_core::UserId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Error type for WebSocket authentication
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Neither an access token nor a refresh token was supplied
    #[error("Authentication token missing")]
    TokenMissing,

    /// Token format is invalid
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,

    /// Token signature is invalid
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token validation failed
    #[error("Token validation failed: {0}")]
    ValidationFailed(String),
}

impl AuthError {
    /// Create a validation failed error
    pub fn validation_failed(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                Self::InvalidFormat(err.to_string())
            }
            _ => Self::ValidationFailed(err.to_string()),
        }
    }
}

/// Trait for validating authentication tokens
#[async_trait::async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a token and return the user it was issued to
    async fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Resolve the user behind a `join` request.
///
/// The access token wins when both are present; the refresh token is only
/// consulted when no access token was sent.
pub async fn authenticate_join(
    validator: &dyn TokenValidator,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> Result<UserId, AuthError> {
    let token = access_token
        .filter(|t| !t.is_empty())
        .or(refresh_token.filter(|t| !t.is_empty()))
        .ok_or(AuthError::TokenMissing)?;
    validator.validate(token).await
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: serde_json::Value,
}

impl TokenUser {
    fn user_id(self) -> Result<UserId, AuthError> {
        match self.id {
            serde_json::Value::String(id) if !id.is_empty() => Ok(UserId::new(id)),
            serde_json::Value::Number(id) => Ok(UserId::new(id.to_string())),
            _ => Err(AuthError::validation_failed("token carries no user id")),
        }
    }
}

/// HS256 JWT validator reading the user id from the `user.id` claim
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Clock skew tolerated when checking `exp`, in seconds
    pub fn leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    pub fn validate_token(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<TokenClaims>(token, &self.key, &self.validation)?;
        data.claims.user.user_id()
    }
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        self.validate_token(token)
    }
}

/// A token validator that validates against a static list of valid tokens
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a valid token for `user_id`
    pub fn add_token(mut self, token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait::async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::validation_failed("Invalid token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_jwt_user_id_claim() {
        let validator = JwtValidator::new(SECRET);
        let t = token(json!({ "user": { "id": "42" }, "exp": now() + 60 }), SECRET);
        assert_eq!(validator.validate_token(&t).unwrap(), UserId::new("42"));

        let numeric = token(json!({ "user": { "id": 7 }, "exp": now() + 60 }), SECRET);
        assert_eq!(validator.validate_token(&numeric).unwrap(), UserId::new("7"));
    }

    #[test]
    fn test_jwt_rejections() {
        let validator = JwtValidator::new(SECRET);

        let forged = token(json!({ "user": { "id": "42" }, "exp": now() + 60 }), "other");
        assert_eq!(
            validator.validate_token(&forged).unwrap_err(),
            AuthError::InvalidSignature
        );

        let expired = token(json!({ "user": { "id": "42" }, "exp": now() - 3600 }), SECRET);
        assert_eq!(
            validator.validate_token(&expired).unwrap_err(),
            AuthError::TokenExpired
        );

        let anonymous = token(json!({ "user": { "id": "" }, "exp": now() + 60 }), SECRET);
        assert!(matches!(
            validator.validate_token(&anonymous).unwrap_err(),
            AuthError::ValidationFailed(_)
        ));

        assert!(validator.validate_token("not-a-jwt").is_err());
    }

    #[tokio::test]
    async fn test_join_prefers_access_token() {
        let validator = StaticTokenValidator::new()
            .add_token("access", "1")
            .add_token("refresh", "2");

        let user = authenticate_join(&validator, Some("access"), Some("refresh"))
            .await
            .unwrap();
        assert_eq!(user, UserId::new("1"));

        let user = authenticate_join(&validator, None, Some("refresh")).await.unwrap();
        assert_eq!(user, UserId::new("2"));

        // a bad access token is not rescued by a good refresh token
        assert!(authenticate_join(&validator, Some("bogus"), Some("refresh"))
            .await
            .is_err());

        assert_eq!(
            authenticate_join(&validator, None, None).await.unwrap_err(),
            AuthError::TokenMissing
        );
    }
}
