//! Domain models
//!
//! Problems, tables and the rows read from the problem catalog.

pub mod problem;
pub mod table;

pub use problem::*;
pub use table::*;
