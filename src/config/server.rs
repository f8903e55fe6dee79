//! Server and authentication configuration types.

use std::time::Duration;

use serde::Deserialize;

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub address: String,
    /// How long in-flight requests get to finish after shutdown begins.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

/// Token authentication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing session tokens.
    pub secret_key: String,
    /// Cookie carrying the session token.
    pub cookie_name: String,
    /// Token lifetime in hours, at most [`MAX_TOKEN_TTL_HOURS`].
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: "change-me".to_string(),
            cookie_name: "auth_token".to_string(),
            // 30 days
            token_ttl_hours: 720,
        }
    }
}
