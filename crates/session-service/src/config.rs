//! Session Service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::session::chat::DEFAULT_RECENT_CHATS_LIMIT;
use crate::session::state::RoomSettings;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default origin allow list.
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Default chat history bound per room.
pub const DEFAULT_MAX_CHAT_HISTORY: usize = 10;

/// Default per-client outbound queue capacity, in frames.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Session Service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// WebSocket listener address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health and metrics listener address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// HS256 secret for identity tokens. `None` only when auth is disabled.
    /// Protected by `SecretString` to prevent accidental logging.
    pub jwt_secret: Option<SecretString>,

    /// Accept the `token` query parameter as the raw client id. Development only.
    pub auth_disabled: bool,

    /// Origins allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,

    /// Chat history bound per room (0 = unbounded).
    pub max_chat_history: usize,

    /// Number of entries returned by `get_recent_chats`.
    pub recent_chats_limit: usize,

    /// Per-client outbound queue capacity, in frames.
    pub outbound_buffer: usize,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("auth_disabled", &self.auth_disabled)
            .field("allowed_origins", &self.allowed_origins)
            .field("max_chat_history", &self.max_chat_history)
            .field("recent_chats_limit", &self.recent_chats_limit)
            .field("outbound_buffer", &self.outbound_buffer)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SESSION_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SESSION_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let auth_disabled = parse_var(vars, "SESSION_AUTH_DISABLED", false)?;

        let jwt_secret = match vars.get("SESSION_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => Some(SecretString::from(secret.clone())),
            _ if auth_disabled => None,
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "SESSION_JWT_SECRET".to_string(),
                ))
            }
        };

        let allowed_origins = vars
            .get("ALLOWED_ORIGINS")
            .map_or(DEFAULT_ALLOWED_ORIGINS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| origin.trim_end_matches('/').to_string())
            .collect();

        let max_chat_history =
            parse_var(vars, "SESSION_MAX_CHAT_HISTORY", DEFAULT_MAX_CHAT_HISTORY)?;

        let recent_chats_limit =
            parse_var(vars, "SESSION_RECENT_CHATS_LIMIT", DEFAULT_RECENT_CHATS_LIMIT)?;

        let outbound_buffer = parse_var(vars, "SESSION_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_OUTBOUND_BUFFER must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            bind_address,
            health_bind_address,
            jwt_secret,
            auth_disabled,
            allowed_origins,
            max_chat_history,
            recent_chats_limit,
            outbound_buffer,
        })
    }

    /// Settings every room in this process is created with.
    #[must_use]
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            max_chat_history: self.max_chat_history,
            recent_chats_limit: self.recent_chats_limit,
        }
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
