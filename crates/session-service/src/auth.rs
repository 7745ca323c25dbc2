//! Identity validation.
//!
//! Maps the credential a client presents at upgrade time to a
//! [`ClientIdentity`]. The room core never sees tokens; it only receives the
//! identity that came out of validation.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted, and `exp` is required and validated
//! - All validation failures collapse into one generic error

use crate::session::client::ClientIdentity;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument};

/// Maximum accepted token size in bytes.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Identity validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No token supplied")]
    MissingToken,

    #[error("The token is invalid or expired")]
    InvalidToken,

    #[error("Token exceeds {MAX_TOKEN_SIZE_BYTES} bytes")]
    TokenTooLarge,
}

/// Turns a client credential into a stable identity.
pub trait IdentityValidator: Send + Sync {
    /// Validate `token` and return the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the token is missing, oversized or invalid.
    fn validate(&self, token: &str) -> Result<ClientIdentity, AuthError>;
}

/// Identity token claims.
///
/// `sub` and `email` identify a person and are redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("name", &self.name)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Claims {
    /// Name to show other room members: `name`, else the local part of
    /// `email`, else `sub`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name;
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
        {
            return local;
        }
        &self.sub
    }
}

/// Validates HS256-signed identity tokens.
pub struct JwtIdentityValidator {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtIdentityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIdentityValidator")
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl JwtIdentityValidator {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify signature and expiry and return the claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenTooLarge` before parsing oversized input, and
    /// `AuthError::InvalidToken` for every other failure.
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            debug!(target: "session.auth", size = token.len(), "Token rejected before parsing");
            return Err(AuthError::TokenTooLarge);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(target: "session.auth", error = %e, "Token verification failed");
            AuthError::InvalidToken
        })?;

        if data.claims.sub.is_empty() {
            debug!(target: "session.auth", "Token has empty subject");
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }
}

impl IdentityValidator for JwtIdentityValidator {
    fn validate(&self, token: &str) -> Result<ClientIdentity, AuthError> {
        let claims = self.verify(token)?;
        debug!(target: "session.auth", "Token validated successfully");
        Ok(ClientIdentity::new(claims.sub.clone(), claims.display_name()))
    }
}

/// Development validator: the token is taken verbatim as the client id.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticIdentityValidator;

impl IdentityValidator for StaticIdentityValidator {
    fn validate(&self, token: &str) -> Result<ClientIdentity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            return Err(AuthError::TokenTooLarge);
        }
        Ok(ClientIdentity::new(token, token))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn validator() -> JwtIdentityValidator {
        JwtIdentityValidator::new(&SecretString::from(SECRET))
    }

    fn claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            name: None,
            email: None,
        }
    }

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let mut c = claims("user-42");
        c.name = Some("Alice".to_string());

        let identity = validator().validate(&sign(&c, SECRET)).unwrap();
        assert_eq!(identity.client_id(), "user-42");
        assert_eq!(identity.display_name(), "Alice");
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut c = claims("user-42");
        assert_eq!(c.display_name(), "user-42");

        c.email = Some("alice@example.com".to_string());
        assert_eq!(c.display_name(), "alice");

        c.name = Some("   ".to_string());
        assert_eq!(c.display_name(), "alice");

        c.name = Some("Alice A.".to_string());
        assert_eq!(c.display_name(), "Alice A.");
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = sign(&claims("user-42"), "another-secret");
        assert_eq!(validator().validate(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let mut c = claims("user-42");
        c.exp = chrono::Utc::now().timestamp() - 3600;
        assert_eq!(
            validator().validate(&sign(&c, SECRET)),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_empty_subject_is_invalid() {
        let token = sign(&claims(""), SECRET);
        assert_eq!(validator().validate(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_TOKEN_SIZE_BYTES + 1);
        assert_eq!(validator().validate(&token), Err(AuthError::TokenTooLarge));
    }

    #[test]
    fn test_garbage_and_missing_tokens() {
        assert_eq!(validator().validate(""), Err(AuthError::MissingToken));
        assert_eq!(
            validator().validate("not.a.jwt"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_claims_debug_redacts_personal_fields() {
        let mut c = claims("secret-user-id");
        c.email = Some("alice@example.com".to_string());

        let debug_str = format!("{c:?}");
        assert!(!debug_str.contains("secret-user-id"));
        assert!(!debug_str.contains("alice@example.com"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_static_validator_uses_token_as_identity() {
        let identity = StaticIdentityValidator.validate(" dev-user ").unwrap();
        assert_eq!(identity.client_id(), "dev-user");
        assert_eq!(identity.display_name(), "dev-user");
        assert_eq!(
            StaticIdentityValidator.validate("  "),
            Err(AuthError::MissingToken)
        );
    }
}
