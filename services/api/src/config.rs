//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use study_session_core::AuthUser;
use tracing::Level;
use uuid::Uuid;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub backend_url: String,
    pub chat_cache_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub cors_origin: String,
    /// Identity handed over by the auth provider ahead of time, if any.
    pub seeded_user: Option<AuthUser>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or =
            |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| {
                ConfigError::MissingVar("DATABASE_URL".to_string())
            })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Backend and Local Storage ---
        let backend_url = var_or("BACKEND_URL", "http://localhost:8000/api/v1")
            .trim_end_matches('/')
            .to_string();
        let chat_cache_dir = PathBuf::from(var_or("CHAT_CACHE_DIR", "./.chat_cache"));
        let upload_dir = PathBuf::from(var_or("UPLOAD_DIR", "./uploads"));
        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:5173");

        // --- Optional Seeded Identity ---
        let seeded_user = match (lookup("STUDY_USER_ID"), lookup("STUDY_ACCESS_TOKEN")) {
            (Some(user_id), Some(access_token)) => {
                let user_id = Uuid::parse_str(user_id.trim()).map_err(|e| {
                    ConfigError::InvalidValue("STUDY_USER_ID".to_string(), e.to_string())
                })?;
                Some(AuthUser { user_id, access_token })
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingVar("STUDY_ACCESS_TOKEN".to_string()))
            }
            (None, Some(_)) => return Err(ConfigError::MissingVar("STUDY_USER_ID".to_string())),
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            backend_url,
            chat_cache_dir,
            upload_dir,
            cors_origin,
            seeded_user,
        })
    }
}
