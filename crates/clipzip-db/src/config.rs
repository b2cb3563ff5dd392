//! Database connection settings.

use std::fmt;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::error::{DbError, DbResult};

/// Database connection pool configuration.
///
/// Either `url` is set, or the connection is assembled from the discrete
/// `DB_*` settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Connection acquisition timeout
    pub acquire_timeout: Duration,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    /// Create config from environment variables.
    pub fn from_env() -> DbResult<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|s| !s.is_empty());

        let url = var("DATABASE_URL");
        let host = var("DB_HOST");
        let database = var("DB_NAME");
        let username = var("DB_USER");

        if url.is_none() {
            let missing: Vec<&str> = [
                ("DB_HOST", &host),
                ("DB_NAME", &database),
                ("DB_USER", &username),
            ]
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k)
            .collect();
            if !missing.is_empty() {
                return Err(DbError::config(format!(
                    "DATABASE_URL not set and missing {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(Self {
            url,
            host: host.unwrap_or_default(),
            port: var("DB_PORT").and_then(|v| v.parse().ok()).unwrap_or(5432),
            database: database.unwrap_or_default(),
            username: username.unwrap_or_default(),
            password: var("DB_PASSWORD"),
            max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            acquire_timeout: Duration::from_secs(
                var("DB_ACQUIRE_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        })
    }

    /// Config pointing at a URL with default pool settings.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            host: String::new(),
            port: 5432,
            database: String::new(),
            username: String::new(),
            password: None,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Build the driver's connect options.
    pub fn connect_options(&self) -> DbResult<PgConnectOptions> {
        if let Some(url) = &self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| DbError::config(format!("invalid DATABASE_URL: {}", e)));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}
