//! SQL Judge - Judge server for SQL exercises
//!
//! Stages every problem's reference tables in a well-known shared-memory
//! segment, runs submitted solutions against them and reports a verdict for
//! each judging request.
//!
//! # Architecture
//!
//! - **Shm**: lifecycle of the exclusively owned shared-memory segment
//! - **Db**: database connection state machine over a driver capability
//! - **Engine**: table staging, solution execution and result checking
//! - **Verdict**: the verdict record and its binary encoding
//! - **Server**: TCP sessions carrying judging requests to the engine

pub mod config;
pub mod constants;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod server;
pub mod shm;
pub mod state;
pub mod verdict;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::JudgingEngine;
pub use error::{JudgeError, JudgeResult, ServerError};
pub use server::Server;
pub use verdict::Verdict;
