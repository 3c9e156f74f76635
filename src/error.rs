//! Custom error types and handling
//!
//! `JudgeError` covers failures of the judging infrastructure itself. A wrong
//! solution is never an error here: it is a verdict with `success = false`.

use crate::engine::TableError;
use crate::models::ProblemNumber;
use crate::shm::ShmError;

/// Infrastructure failure while judging
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("Judging requested before tables were prepared")]
    NotPrepared,

    #[error("Unknown problem: {0}")]
    UnknownProblem(ProblemNumber),

    #[error("Table load failed: {0}")]
    TableLoad(String),

    #[error("Answer load failed: {0}")]
    AnswerLoad(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Checker failed: {0}")]
    Checker(String),

    #[error("Shared table storage error: {0}")]
    Storage(#[from] TableError),

    #[error("Database error: {0}")]
    Database(String),
}

impl JudgeError {
    /// Stable code sent to clients in failure frames
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotPrepared => "NOT_PREPARED",
            Self::UnknownProblem(_) => "UNKNOWN_PROBLEM",
            Self::TableLoad(_) => "TABLE_LOAD_ERROR",
            Self::AnswerLoad(_) => "ANSWER_LOAD_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Checker(_) => "CHECKER_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<sqlx::Error> for JudgeError {
    fn from(err: sqlx::Error) -> Self {
        JudgeError::Database(err.to_string())
    }
}

impl From<DatabaseError> for JudgeError {
    fn from(err: DatabaseError) -> Self {
        JudgeError::Database(err.to_string())
    }
}

/// Database connection errors
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The connection was used before `connect` succeeded
    #[error("Database connection is not available")]
    NotConnected,

    #[error("Database driver error during {step}: {message}")]
    Driver { step: &'static str, message: String },
}

impl DatabaseError {
    pub fn driver(step: &'static str, err: impl std::fmt::Display) -> Self {
        DatabaseError::Driver {
            step,
            message: err.to_string(),
        }
    }
}

/// Startup and lifecycle failures of the judge server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    SharedMemory(#[from] ShmError),

    #[error("Failed to connect to the problem database as {user}")]
    ConnectionFailure { user: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using JudgeError
pub type JudgeResult<T> = Result<T, JudgeError>;
