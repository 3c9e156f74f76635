//! Application configuration management
//!
//! Configuration is loaded from environment variables (and `.env`) once at
//! startup and validated before any resource is acquired.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_DATA_SOURCE, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT, DEFAULT_SHM_NAME, DEFAULT_SHM_RESULT_CAPACITY, DEFAULT_SHM_SIZE,
    DEFAULT_SOLUTIONS_PATH, DEFAULT_TIME_LIMIT_MS,
};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub shared_memory: SharedMemoryConfig,
    pub execution: ExecutionConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Data source the connection environment is built from
    pub data_source: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

// Keeps the password out of logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("data_source", &self.data_source)
            .field("user", &self.user)
            .field("password", &"***")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Shared-memory segment configuration
#[derive(Debug, Clone)]
pub struct SharedMemoryConfig {
    pub name: String,
    /// Total segment size in bytes
    pub size: usize,
    /// Bytes reserved at the tail for the result table
    pub result_capacity: usize,
}

/// Solution execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Directory containing one solution per problem number
    pub solutions_path: PathBuf,
    /// Wall-clock limit for a single run
    pub time_limit_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            shared_memory: SharedMemoryConfig::from_env()?,
            execution: ExecutionConfig::from_env()?,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("JUDGE_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
            port: parse_or("JUDGE_PORT", DEFAULT_SERVER_PORT)?,
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            data_source: env::var("DATA_SOURCE").unwrap_or_else(|_| DEFAULT_DATA_SOURCE.to_string()),
            user: env::var("DATABASE_USER")
                .map_err(|_| ConfigError::Missing("DATABASE_USER".to_string()))?,
            password: env::var("DATABASE_PASSWORD")
                .map_err(|_| ConfigError::Missing("DATABASE_PASSWORD".to_string()))?,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
        })
    }
}

impl SharedMemoryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            name: env::var("SHM_NAME").unwrap_or_else(|_| DEFAULT_SHM_NAME.to_string()),
            size: parse_or("SHM_SIZE", DEFAULT_SHM_SIZE)?,
            result_capacity: parse_or("SHM_RESULT_CAPACITY", DEFAULT_SHM_RESULT_CAPACITY)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// The result region must leave room for the header and some arena.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.result_capacity == 0 || self.result_capacity >= self.size / 2 {
            return Err(ConfigError::InvalidValue("SHM_RESULT_CAPACITY".to_string()));
        }
        Ok(())
    }
}

impl ExecutionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let time_limit_ms = parse_or("TIME_LIMIT_MS", DEFAULT_TIME_LIMIT_MS)?;
        if time_limit_ms == 0 {
            return Err(ConfigError::InvalidValue("TIME_LIMIT_MS".to_string()));
        }

        Ok(Self {
            solutions_path: PathBuf::from(
                env::var("SOLUTIONS_PATH").unwrap_or_else(|_| DEFAULT_SOLUTIONS_PATH.to_string()),
            ),
            time_limit_ms,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            rust_log: "info".to_string(),
        };
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 9000);
        assert_eq!(DEFAULT_SHM_SIZE, 2_147_483_648);
    }

    #[test]
    fn test_result_capacity_validation() {
        let ok = SharedMemoryConfig {
            name: DEFAULT_SHM_NAME.to_string(),
            size: 1 << 20,
            result_capacity: 1 << 16,
        };
        assert!(ok.validate().is_ok());

        let too_large = SharedMemoryConfig {
            result_capacity: 1 << 20,
            ..ok.clone()
        };
        assert!(matches!(
            too_large.validate(),
            Err(ConfigError::InvalidValue(_))
        ));

        let empty = SharedMemoryConfig {
            result_capacity: 0,
            ..ok
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_database_config_hides_password() {
        let config = DatabaseConfig {
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            user: "trainer".to_string(),
            password: "hunter2".to_string(),
            max_connections: 1,
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("trainer"));
    }
}
