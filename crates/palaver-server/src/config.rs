//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use palaver_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket listener.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Postgres connection string.
    /// Env: `DATABASE_URL`
    /// Default: `postgres://localhost/palaver`
    pub database_url: String,

    /// HMAC secret for verifying client JWTs. The token service signs with
    /// the same secret.
    /// Env: `JWT_SECRET`
    /// Default: `palaver-dev-secret` (development only).
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_url: "postgres://localhost/palaver".to_string(),
            jwt_secret: "palaver-dev-secret".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using the dev-only default"),
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
