//! Test identities and identity tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use session_service::auth::Claims;
use session_service::session::{ClientHandle, ClientIdentity};
use tokio::sync::mpsc;

/// Secret used by [`mint_token`] callers that don't care about the value.
pub const TEST_JWT_SECRET: &str = "session-test-secret-0123456789abcdef";

/// A named test user.
///
/// The display name defaults to the client id with its first letter
/// uppercased: `TestIdentity::new("alice")` displays as "Alice".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestIdentity {
    pub client_id: String,
    pub display_name: String,
}

impl TestIdentity {
    pub fn new(client_id: &str) -> Self {
        let mut chars = client_id.chars();
        let display_name = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        Self {
            client_id: client_id.to_string(),
            display_name,
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(self.client_id.clone(), self.display_name.clone())
    }

    /// A fresh connection for this identity and the receiving end of its queue.
    pub fn handle(&self, capacity: usize) -> (ClientHandle, mpsc::Receiver<bytes::Bytes>) {
        ClientHandle::new(self.identity(), capacity)
    }

    /// Identity token for this user, valid for an hour.
    pub fn token(&self, secret: &str) -> String {
        mint_token(
            secret,
            &self.client_id,
            Some(&self.display_name),
            (Utc::now() + Duration::hours(1)).timestamp(),
        )
    }
}

/// Sign an HS256 identity token.
///
/// `exp` is a Unix timestamp; pass one in the past to get an expired token.
pub fn mint_token(secret: &str, sub: &str, name: Option<&str>, exp: i64) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp,
        name: name.map(str::to_string),
        email: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 signing with an in-memory key cannot fail")
}

/// An identity token that expired an hour ago.
pub fn expired_token(secret: &str, sub: &str) -> String {
    mint_token(secret, sub, None, (Utc::now() - Duration::hours(1)).timestamp())
}
