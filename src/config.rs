//! Process configuration, read once from the environment at startup.

use std::env;
use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set")] MissingJwtSecret,
    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long")] WeakJwtSecret,
    #[error("{0} is not a valid number: {1}")] InvalidNumber(&'static str, String),
}

/// Connection settings handed to `db::connect_to_db`. A missing URL means no database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database: DbConfig,
    pub frontend_url: String,
    pub data_dir: Option<PathBuf>,
    pub cache_provider: String,
    pub cache_purge_url: Option<String>,
    pub rate_limit: RateLimitConfig,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("JWT_SECRET").map_err(|_| ConfigError::MissingJwtSecret)?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakJwtSecret);
        }

        let max_connections = match non_empty("DB_MAX_CONNECTIONS") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidNumber("DB_MAX_CONNECTIONS", v))?,
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database: DbConfig { url: non_empty("DATABASE_URL"), max_connections },
            frontend_url: non_empty("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string()),
            data_dir: non_empty("THREADLINE_DATA_DIR").map(PathBuf::from),
            cache_provider: non_empty("CACHE_PROVIDER").unwrap_or_else(|| "memory".to_string()).to_lowercase(),
            cache_purge_url: non_empty("CACHE_PURGE_URL"),
            rate_limit: RateLimitConfig::from_env(),
        })
    }
}
