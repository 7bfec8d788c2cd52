//! Environment-driven configuration, read once at startup.

use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on (`BACKEND_PORT`, default 8000).
    pub port: u16,
    /// SQLite connection string (`DATABASE_URL`); in-memory store when unset.
    pub database_url: Option<String>,
    /// Deployment environment name (`ENVIRONMENT`, default `development`).
    pub environment: String,
    /// Allowed CORS origins outside development (`CORS_ORIGINS`,
    /// comma-separated).
    pub cors_origins: Vec<String>,
    /// Auto-create sessions on first use (`IMPLICIT_SESSIONS`).
    pub implicit_sessions: bool,
    /// Per-execution time budget (`EXEC_TIMEOUT_SECS`, default 30).
    pub exec_timeout: Duration,
}

impl Config {
    /// Read configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("BACKEND_PORT").unwrap_or(8000),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or_default(),
            implicit_sessions: std::env::var("IMPLICIT_SESSIONS")
                .is_ok_and(|raw| parse_bool(&raw)),
            exec_timeout: Duration::from_secs(env_parsed("EXEC_TIMEOUT_SECS").unwrap_or(30)),
        }
    }

    /// Whether the server runs in development mode (permissive CORS).
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
