//! Judging engine
//!
//! Ties the collaborators together: reference tables are staged in shared
//! memory, answers are loaded, and each judging request runs a solution and
//! checks its result table. Infrastructure failures come back as
//! `JudgeError`; a wrong solution is a verdict with `success = false`.

pub mod checker;
pub mod collaborators;
pub mod loader;
pub mod rows;
pub mod runner;
pub mod table_manager;

pub use checker::{Answer, AnswerSet, Comparison, PgResultChecker, compare_tables};
pub use collaborators::{ResultChecker, RunStatus, SolutionRunner, TableLoader};
pub use loader::PgTableLoader;
pub use runner::ProcessSolutionRunner;
pub use table_manager::{Directory, Extent, SegmentHeader, TableError, TableManager};

use crate::constants::MAX_COMMENT_LEN;
use crate::error::{JudgeError, JudgeResult};
use crate::models::{ProblemNumber, ResultTable, Table};
use crate::shm::{SharedMemorySegment, ShmError};
use crate::verdict::Verdict;

/// Orchestrates table loading, solution execution and result checking
pub struct JudgingEngine<C: Sync> {
    tables: TableManager,
    table_loader: Box<dyn TableLoader<C>>,
    result_checker: Box<dyn ResultChecker<C>>,
    solution_runner: Box<dyn SolutionRunner>,
    prepared: bool,
    /// Problem and status of the last run since the last reset
    last_run: Option<(ProblemNumber, RunStatus)>,
}

impl<C: Sync> JudgingEngine<C> {
    /// Build an engine around an acquired segment
    pub fn new(
        segment: SharedMemorySegment,
        result_capacity: usize,
        table_loader: Box<dyn TableLoader<C>>,
        result_checker: Box<dyn ResultChecker<C>>,
        solution_runner: Box<dyn SolutionRunner>,
    ) -> JudgeResult<Self> {
        Ok(Self {
            tables: TableManager::new(segment, result_capacity)?,
            table_loader,
            result_checker,
            solution_runner,
            prepared: false,
            last_run: None,
        })
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    /// Stage reference tables, then load expected answers.
    ///
    /// Must succeed before any run or check.
    pub async fn prepare_tables(&mut self, connection: &C) -> JudgeResult<()> {
        self.prepared = false;
        self.last_run = None;
        self.tables.clear()?;

        self.table_loader.load(connection, &mut self.tables).await?;
        self.tables.publish_directory()?;
        self.result_checker.load_answers(connection).await?;

        self.prepared = true;
        tracing::info!(problems = self.tables.problem_count(), "Judging tables prepared");
        Ok(())
    }

    /// Reset the result table and elapsed time ahead of a fresh run
    pub fn prepare_debug(&mut self, problem: ProblemNumber) -> JudgeResult<()> {
        self.ensure_prepared()?;
        self.solution_runner
            .allocate_columns_for_result_table(problem, &mut self.tables)?;
        self.solution_runner.reset_elapsed_time();
        self.last_run = None;
        tracing::debug!(problem, "Execution state reset");
        Ok(())
    }

    /// Run the solution of `problem` and return the encoded verdict
    pub async fn run_solution(&mut self, problem: ProblemNumber) -> JudgeResult<Vec<u8>> {
        Ok(self.judge(problem).await?.encode())
    }

    /// Check the last run of `problem` again and return the encoded verdict
    pub fn check_result(&mut self, problem: ProblemNumber) -> JudgeResult<Vec<u8>> {
        Ok(self.verdict(problem)?.encode())
    }

    pub async fn judge(&mut self, problem: ProblemNumber) -> JudgeResult<Verdict> {
        self.ensure_prepared()?;

        let status = self.solution_runner.run(problem, &mut self.tables).await?;
        self.last_run = Some((problem, status));

        let verdict = self.verdict(problem)?;
        tracing::info!(problem, %verdict, "Solution judged");
        Ok(verdict)
    }

    /// Build the verdict for the current result table
    pub fn verdict(&mut self, problem: ProblemNumber) -> JudgeResult<Verdict> {
        self.ensure_prepared()?;
        let elapsed = self.solution_runner.elapsed_time();

        if let Some((run_problem, status)) = &self.last_run {
            if *run_problem == problem {
                if let Some(comment) = status.failure_comment() {
                    return Ok(Verdict::new(false, elapsed, bounded_comment(comment)));
                }
            }
        }

        let result = match self.tables.result_table() {
            Ok(result) => result,
            Err(TableError::NoResult) => ResultTable {
                problem_number: problem,
                table: Table::default(),
            },
            Err(e) => return Err(e.into()),
        };
        if result.problem_number != problem {
            tracing::warn!(
                problem,
                allocated_for = result.problem_number,
                "Checking a result table allocated for another problem"
            );
        }

        let success = self.result_checker.check(&result.table, problem)?;
        let comment = bounded_comment(self.result_checker.comment().to_string());
        Ok(Verdict::new(success, elapsed, comment))
    }

    /// Release the shared-memory segment. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), ShmError> {
        self.prepared = false;
        self.tables.release()
    }

    fn ensure_prepared(&self) -> JudgeResult<()> {
        if self.prepared {
            Ok(())
        } else {
            Err(JudgeError::NotPrepared)
        }
    }
}

/// Cut `comment` to `MAX_COMMENT_LEN` bytes on a character boundary
fn bounded_comment(mut comment: String) -> String {
    if comment.len() <= MAX_COMMENT_LEN {
        return comment;
    }
    let mut end = MAX_COMMENT_LEN - ELLIPSIS.len();
    while !comment.is_char_boundary(end) {
        end -= 1;
    }
    comment.truncate(end);
    comment.push_str(ELLIPSIS);
    comment
}

const ELLIPSIS: &str = "...";
