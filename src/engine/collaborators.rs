//! Contracts of the components the engine drives
//!
//! `C` is the database connection handle the loaders read from.

use async_trait::async_trait;

use crate::engine::TableManager;
use crate::error::JudgeResult;
use crate::models::{ProblemNumber, Table};

/// Populates the shared-memory reference tables
#[async_trait]
pub trait TableLoader<C: Sync>: Send + Sync {
    async fn load(&self, connection: &C, tables: &mut TableManager) -> JudgeResult<()>;
}

/// Holds expected answers and compares result tables against them
#[async_trait]
pub trait ResultChecker<C: Sync>: Send + Sync {
    async fn load_answers(&mut self, connection: &C) -> JudgeResult<()>;

    /// Whether `result` is the expected answer of `problem`
    fn check(&mut self, result: &Table, problem: ProblemNumber) -> JudgeResult<bool>;

    /// Explanation of the last `check`
    fn comment(&self) -> &str;
}

/// How a solution run ended, from the solution's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Finished and its result table was written
    Completed,
    TimedOut { limit_ms: u64 },
    Crashed(String),
    InvalidOutput(String),
}

impl RunStatus {
    /// Verdict comment for runs that cannot be checked
    pub fn failure_comment(&self) -> Option<String> {
        match self {
            RunStatus::Completed => None,
            RunStatus::TimedOut { limit_ms } => {
                Some(format!("time limit exceeded ({} ms)", limit_ms))
            }
            RunStatus::Crashed(message) => Some(format!("runtime error: {}", message)),
            RunStatus::InvalidOutput(message) => Some(format!("invalid output: {}", message)),
        }
    }
}

/// Executes a submission and materializes its result table
#[async_trait]
pub trait SolutionRunner: Send + Sync {
    /// Reset the result table for a fresh run of `problem`
    fn allocate_columns_for_result_table(
        &mut self,
        problem: ProblemNumber,
        tables: &mut TableManager,
    ) -> JudgeResult<()>;

    fn reset_elapsed_time(&mut self);

    /// Run the solution. `Err` means the run itself could not be carried out.
    async fn run(&mut self, problem: ProblemNumber, tables: &mut TableManager)
    -> JudgeResult<RunStatus>;

    /// Elapsed time of the last run in milliseconds
    fn elapsed_time(&self) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_comments() {
        assert_eq!(RunStatus::Completed.failure_comment(), None);
        assert_eq!(
            RunStatus::TimedOut { limit_ms: 500 }.failure_comment().unwrap(),
            "time limit exceeded (500 ms)"
        );
        assert!(
            RunStatus::Crashed("exit code 3".to_string())
                .failure_comment()
                .unwrap()
                .contains("exit code 3")
        );
    }
}
