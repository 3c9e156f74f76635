//! PostgreSQL driver backed by sqlx

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::db::DatabaseDriver;
use crate::error::DatabaseError;

/// Driver for the problem database
#[derive(Debug, Clone)]
pub struct PgDriver {
    data_source: String,
    max_connections: u32,
}

/// Parsed data source; user and password are applied at connect time
#[derive(Debug, Clone)]
pub struct PgEnvironment {
    options: PgConnectOptions,
}

/// Connection handle; the pool exists only while connected
#[derive(Debug, Default)]
pub struct PgConnection {
    pool: Option<PgPool>,
}

impl PgConnection {
    /// Get the pool for running queries
    pub fn pool(&self) -> Result<&PgPool, DatabaseError> {
        self.pool.as_ref().ok_or(DatabaseError::NotConnected)
    }
}

impl PgDriver {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            data_source: config.data_source.clone(),
            max_connections: config.max_connections,
        }
    }
}

#[async_trait]
impl DatabaseDriver for PgDriver {
    type Environment = PgEnvironment;
    type Connection = PgConnection;

    fn allocate_environment(&self) -> Result<PgEnvironment, DatabaseError> {
        let options = PgConnectOptions::from_str(&self.data_source)
            .map_err(|e| DatabaseError::driver("allocate environment", e))?;
        Ok(PgEnvironment { options })
    }

    fn allocate_connection(&self, _environment: &PgEnvironment) -> Result<PgConnection, DatabaseError> {
        Ok(PgConnection::default())
    }

    async fn connect(
        &self,
        environment: &PgEnvironment,
        connection: &mut PgConnection,
        user: &str,
        password: &str,
    ) -> Result<(), DatabaseError> {
        let options = environment
            .options
            .clone()
            .username(user)
            .password(password);

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::driver("connect", e))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| DatabaseError::driver("connect", e))?;

        connection.pool = Some(pool);
        Ok(())
    }

    async fn free_connection(&self, connection: &mut PgConnection) -> Result<(), DatabaseError> {
        if let Some(pool) = connection.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    fn free_environment(&self, _environment: &mut PgEnvironment) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(data_source: &str) -> PgDriver {
        PgDriver {
            data_source: data_source.to_string(),
            max_connections: 1,
        }
    }

    #[test]
    fn test_environment_from_data_source() {
        let env = driver("postgres://localhost:5432/trainer").allocate_environment();
        assert!(env.is_ok());
    }

    #[test]
    fn test_invalid_data_source_fails_environment() {
        let err = driver("not a url").allocate_environment().unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Driver {
                step: "allocate environment",
                ..
            }
        ));
    }

    #[test]
    fn test_unconnected_handle_has_no_pool() {
        let handle = PgConnection::default();
        assert!(matches!(handle.pool(), Err(DatabaseError::NotConnected)));
    }
}
