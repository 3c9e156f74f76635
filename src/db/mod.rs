//! Database module
//!
//! The connection state machine, the driver capability it is built on, and
//! the PostgreSQL driver used in production.

pub mod connection;
pub mod driver;
pub mod postgres;

pub use connection::DatabaseConnection;
pub use driver::DatabaseDriver;
pub use postgres::{PgConnection, PgDriver, PgEnvironment};
