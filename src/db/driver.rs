//! Database driver capability
//!
//! The judge needs two handles from its database: an environment and a
//! connection allocated from it. `DatabaseConnection` sequences them; a
//! driver only knows how to allocate, connect and free each one.

use async_trait::async_trait;

use crate::error::DatabaseError;

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Process-level handle the connection is allocated from
    type Environment: Send + Sync;

    /// Connection handle handed to table and answer loaders
    type Connection: Send + Sync;

    fn allocate_environment(&self) -> Result<Self::Environment, DatabaseError>;

    fn allocate_connection(
        &self,
        environment: &Self::Environment,
    ) -> Result<Self::Connection, DatabaseError>;

    /// Open the network session on an allocated connection handle
    async fn connect(
        &self,
        environment: &Self::Environment,
        connection: &mut Self::Connection,
        user: &str,
        password: &str,
    ) -> Result<(), DatabaseError>;

    /// Free a connection handle. On error the handle must stay freeable.
    async fn free_connection(&self, connection: &mut Self::Connection) -> Result<(), DatabaseError>;

    /// Free an environment handle. On error the handle must stay freeable.
    fn free_environment(&self, environment: &mut Self::Environment) -> Result<(), DatabaseError>;
}
