//! Database connection state machine
//!
//! `Disconnected --connect--> Connected --disconnect--> Disconnected`.
//! Failed transitions leave the state unchanged, except that a partially
//! completed disconnect parks the remaining handles in `Releasing` so a
//! later `disconnect` can finish the job.

use crate::db::DatabaseDriver;
use crate::error::DatabaseError;

enum Handles<E, C> {
    Disconnected,
    Connected {
        environment: E,
        connection: C,
    },
    Releasing {
        environment: Option<E>,
        connection: Option<C>,
    },
}

/// Environment and connection handle pair of one database session
pub struct DatabaseConnection<D: DatabaseDriver> {
    driver: D,
    handles: Handles<D::Environment, D::Connection>,
}

impl<D: DatabaseDriver> DatabaseConnection<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            handles: Handles::Disconnected,
        }
    }

    /// Allocate both handles and open the session.
    ///
    /// Returns `true` immediately when already connected. On failure any
    /// handle allocated so far is freed (best effort) and discarded.
    pub async fn connect(&mut self, user: &str, password: &str) -> bool {
        match self.handles {
            Handles::Connected { .. } => return true,
            Handles::Releasing { .. } => {
                tracing::warn!("Finishing pending release before reconnecting");
                if !self.disconnect().await {
                    return false;
                }
            }
            Handles::Disconnected => {}
        }

        let mut environment = match self.driver.allocate_environment() {
            Ok(environment) => environment,
            Err(e) => {
                tracing::error!("Failed to allocate database environment: {}", e);
                return false;
            }
        };

        let mut connection = match self.driver.allocate_connection(&environment) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to allocate database connection: {}", e);
                self.discard_environment(&mut environment);
                return false;
            }
        };

        if let Err(e) = self
            .driver
            .connect(&environment, &mut connection, user, password)
            .await
        {
            tracing::error!(user, "Failed to connect to database: {}", e);
            if let Err(e) = self.driver.free_connection(&mut connection).await {
                tracing::warn!("Failed to free connection after failed connect: {}", e);
            }
            self.discard_environment(&mut environment);
            return false;
        }

        tracing::info!(user, "Connected to database");
        self.handles = Handles::Connected {
            environment,
            connection,
        };
        true
    }

    /// Free the connection handle, then the environment handle.
    ///
    /// Returns `true` immediately when already disconnected. A failed free
    /// keeps the remaining handles so the call can be retried.
    pub async fn disconnect(&mut self) -> bool {
        let (mut environment, mut connection) =
            match std::mem::replace(&mut self.handles, Handles::Disconnected) {
                Handles::Disconnected => return true,
                Handles::Connected {
                    environment,
                    connection,
                } => (Some(environment), Some(connection)),
                Handles::Releasing {
                    environment,
                    connection,
                } => (environment, connection),
            };

        let freed = match connection.as_mut() {
            Some(handle) => self.driver.free_connection(handle).await,
            None => Ok(()),
        };
        if let Err(e) = freed {
            tracing::error!("Failed to free database connection: {}", e);
            self.handles = Handles::Releasing {
                environment,
                connection,
            };
            return false;
        }

        let freed = match environment.as_mut() {
            Some(handle) => self.driver.free_environment(handle),
            None => Ok(()),
        };
        if let Err(e) = freed {
            tracing::error!("Failed to free database environment: {}", e);
            self.handles = Handles::Releasing {
                environment,
                connection: None,
            };
            return false;
        }

        tracing::info!("Disconnected from database");
        true
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.handles, Handles::Connected { .. })
    }

    /// Get the connection handle; fails with `NotConnected` unless connected
    pub fn connection(&self) -> Result<&D::Connection, DatabaseError> {
        match &self.handles {
            Handles::Connected { connection, .. } => Ok(connection),
            _ => Err(DatabaseError::NotConnected),
        }
    }

    fn discard_environment(&self, environment: &mut D::Environment) {
        if let Err(e) = self.driver.free_environment(environment) {
            tracing::warn!("Failed to free environment after failed connect: {}", e);
        }
    }
}

impl<D: DatabaseDriver> Drop for DatabaseConnection<D> {
    fn drop(&mut self) {
        match &mut self.handles {
            Handles::Disconnected => {}
            Handles::Connected { environment, .. }
            | Handles::Releasing {
                environment: Some(environment),
                ..
            } => {
                tracing::error!("Database connection dropped without disconnect");
                if let Err(e) = self.driver.free_environment(environment) {
                    tracing::error!("Failed to free database environment on drop: {}", e);
                }
            }
            Handles::Releasing {
                environment: None, ..
            } => {
                tracing::error!("Database connection dropped with an unfinished release");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDriver, FakeStep};

    #[tokio::test]
    async fn test_fresh_connection_is_not_connected() {
        let db = DatabaseConnection::new(FakeDriver::default());
        assert!(!db.is_connected());
        assert!(matches!(db.connection(), Err(DatabaseError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_frees_in_reverse_order() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(db.connect("trainer", "secret").await);
        assert!(db.is_connected());
        assert!(db.connection().is_ok());

        assert!(db.disconnect().await);
        assert!(!db.is_connected());
        assert_eq!(
            driver.calls(),
            vec![
                "allocate_environment",
                "allocate_connection",
                "connect",
                "free_connection",
                "free_environment",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(db.connect("trainer", "secret").await);
        assert!(db.connect("trainer", "secret").await);
        assert_eq!(driver.count("allocate_environment"), 1);
        assert!(db.disconnect().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(db.disconnect().await);
        assert!(db.connect("trainer", "secret").await);
        assert!(db.disconnect().await);
        assert!(db.disconnect().await);
        assert_eq!(driver.count("free_connection"), 1);
        assert_eq!(driver.count("free_environment"), 1);
    }

    #[tokio::test]
    async fn test_failed_environment_allocation() {
        let driver = FakeDriver::failing(FakeStep::AllocateEnvironment);
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(!db.connect("trainer", "secret").await);
        assert!(!db.is_connected());
        assert_eq!(driver.calls(), vec!["allocate_environment"]);
    }

    #[tokio::test]
    async fn test_failed_connection_allocation_frees_environment() {
        let driver = FakeDriver::failing(FakeStep::AllocateConnection);
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(!db.connect("trainer", "secret").await);
        assert!(!db.is_connected());
        assert_eq!(
            driver.calls(),
            vec![
                "allocate_environment",
                "allocate_connection",
                "free_environment",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_frees_both_handles() {
        let driver = FakeDriver::failing(FakeStep::Connect);
        let mut db = DatabaseConnection::new(driver.clone());

        assert!(!db.connect("trainer", "wrong").await);
        assert!(!db.is_connected());
        assert!(matches!(db.connection(), Err(DatabaseError::NotConnected)));
        assert_eq!(driver.count("free_connection"), 1);
        assert_eq!(driver.count("free_environment"), 1);

        // Nothing left to release.
        assert!(db.disconnect().await);
        assert_eq!(driver.count("free_connection"), 1);
    }

    #[tokio::test]
    async fn test_partial_disconnect_can_be_retried() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());
        assert!(db.connect("trainer", "secret").await);

        driver.fail_once(FakeStep::FreeEnvironment);
        assert!(!db.disconnect().await);
        assert!(!db.is_connected());
        assert!(matches!(db.connection(), Err(DatabaseError::NotConnected)));

        assert!(db.disconnect().await);
        // The connection handle is freed exactly once across both attempts.
        assert_eq!(driver.count("free_connection"), 1);
        assert_eq!(driver.count("free_environment"), 2);
    }

    #[tokio::test]
    async fn test_failed_connection_free_keeps_both_handles() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());
        assert!(db.connect("trainer", "secret").await);

        driver.fail_once(FakeStep::FreeConnection);
        assert!(!db.disconnect().await);
        assert_eq!(driver.count("free_environment"), 0);

        assert!(db.disconnect().await);
        assert_eq!(driver.count("free_connection"), 2);
        assert_eq!(driver.count("free_environment"), 1);
    }

    #[tokio::test]
    async fn test_connect_finishes_pending_release() {
        let driver = FakeDriver::default();
        let mut db = DatabaseConnection::new(driver.clone());
        assert!(db.connect("trainer", "secret").await);

        driver.fail_once(FakeStep::FreeEnvironment);
        assert!(!db.disconnect().await);

        assert!(db.connect("trainer", "secret").await);
        assert!(db.is_connected());
        assert_eq!(driver.count("allocate_environment"), 2);
        assert_eq!(driver.count("free_environment"), 2);
        assert!(db.disconnect().await);
    }

    #[tokio::test]
    async fn test_drop_while_connected_frees_environment() {
        let driver = FakeDriver::default();
        {
            let mut db = DatabaseConnection::new(driver.clone());
            assert!(db.connect("trainer", "secret").await);
        }
        assert_eq!(driver.count("free_environment"), 1);
    }
}
