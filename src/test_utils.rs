//! Test utilities
//!
//! Fakes for the database driver and the engine collaborators, so the
//! state machine and the judging flow can be exercised without PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::DatabaseDriver;
use crate::engine::{
    Answer, AnswerSet, JudgingEngine, ResultChecker, RunStatus, SolutionRunner, TableLoader,
    TableManager,
};
use crate::error::{DatabaseError, JudgeError, JudgeResult};
use crate::models::{ProblemNumber, ResultTable, Table, Value};
use crate::shm::SharedMemorySegment;

/// A segment name no other test uses
pub fn unique_shm_name() -> String {
    format!("/sqljudge-test-{}", uuid::Uuid::new_v4().simple())
}

/// `id | name` with two rows
pub fn sample_table() -> Table {
    Table::with_rows(
        vec!["id".to_string(), "name".to_string()],
        vec![
            vec![Value::Int(1), Value::Text("ann".to_string())],
            vec![Value::Int(2), Value::Text("bob".to_string())],
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStep {
    AllocateEnvironment,
    AllocateConnection,
    Connect,
    FreeConnection,
    FreeEnvironment,
}

impl FakeStep {
    fn name(self) -> &'static str {
        match self {
            FakeStep::AllocateEnvironment => "allocate_environment",
            FakeStep::AllocateConnection => "allocate_connection",
            FakeStep::Connect => "connect",
            FakeStep::FreeConnection => "free_connection",
            FakeStep::FreeEnvironment => "free_environment",
        }
    }
}

#[derive(Default)]
struct FakeDriverState {
    calls: Vec<&'static str>,
    always_fail: Option<FakeStep>,
    fail_once: Option<FakeStep>,
}

/// Driver recording every call; clones share the same record
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeDriverState>>,
}

impl FakeDriver {
    /// A driver whose `step` always fails
    pub fn failing(step: FakeStep) -> Self {
        let driver = Self::default();
        driver.state.lock().unwrap().always_fail = Some(step);
        driver
    }

    /// Make the next call of `step` fail
    pub fn fail_once(&self, step: FakeStep) {
        self.state.lock().unwrap().fail_once = Some(step);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| **call == name).count()
    }

    fn record(&self, step: FakeStep) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(step.name());

        let fails = if state.fail_once == Some(step) {
            state.fail_once = None;
            true
        } else {
            state.always_fail == Some(step)
        };

        if fails {
            Err(DatabaseError::driver(step.name(), "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DatabaseDriver for FakeDriver {
    type Environment = ();
    type Connection = ();

    fn allocate_environment(&self) -> Result<(), DatabaseError> {
        self.record(FakeStep::AllocateEnvironment)
    }

    fn allocate_connection(&self, _environment: &()) -> Result<(), DatabaseError> {
        self.record(FakeStep::AllocateConnection)
    }

    async fn connect(
        &self,
        _environment: &(),
        _connection: &mut (),
        _user: &str,
        _password: &str,
    ) -> Result<(), DatabaseError> {
        self.record(FakeStep::Connect)
    }

    async fn free_connection(&self, _connection: &mut ()) -> Result<(), DatabaseError> {
        self.record(FakeStep::FreeConnection)
    }

    fn free_environment(&self, _environment: &mut ()) -> Result<(), DatabaseError> {
        self.record(FakeStep::FreeEnvironment)
    }
}

/// Stages `people` for problem 1 and `orders` for problem 2
#[derive(Clone, Default)]
pub struct FakeTableLoader {
    fail_next: Arc<AtomicBool>,
}

impl FakeTableLoader {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableLoader<()> for FakeTableLoader {
    async fn load(&self, _connection: &(), tables: &mut TableManager) -> JudgeResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(JudgeError::TableLoad("catalog unavailable".to_string()));
        }
        tables.store_reference(1, "people", &sample_table())?;
        tables.store_reference(2, "orders", &sample_table())?;
        Ok(())
    }
}

/// Expects `sample_table()` for problems 1 and 2
#[derive(Default)]
pub struct FakeChecker {
    answers: AnswerSet,
    comment: String,
}

#[async_trait]
impl ResultChecker<()> for FakeChecker {
    async fn load_answers(&mut self, _connection: &()) -> JudgeResult<()> {
        self.answers.clear();
        for problem in [1, 2] {
            self.answers.insert(
                problem,
                Answer {
                    table: sample_table(),
                    ordered: false,
                },
            );
        }
        Ok(())
    }

    fn check(&mut self, result: &Table, problem: ProblemNumber) -> JudgeResult<bool> {
        let comparison = self.answers.check(result, problem)?;
        self.comment = comparison.comment;
        Ok(comparison.matches)
    }

    fn comment(&self) -> &str {
        &self.comment
    }
}

/// Scripted outcome of a fake solution run
#[derive(Debug, Clone)]
pub enum FakeRun {
    /// Writes the table and completes
    Output(Table),
    Status(RunStatus),
    /// The run cannot be carried out
    Fail,
}

/// Runner that plays back scripted outcomes in 42 ms
pub struct FakeRunner {
    runs: HashMap<ProblemNumber, FakeRun>,
    elapsed_ms: i64,
}

impl FakeRunner {
    pub fn new(runs: Vec<(ProblemNumber, FakeRun)>) -> Self {
        Self {
            runs: runs.into_iter().collect(),
            elapsed_ms: 0,
        }
    }
}

#[async_trait]
impl SolutionRunner for FakeRunner {
    fn allocate_columns_for_result_table(
        &mut self,
        problem: ProblemNumber,
        tables: &mut TableManager,
    ) -> JudgeResult<()> {
        tables.reset_result(problem, Vec::new())?;
        Ok(())
    }

    fn reset_elapsed_time(&mut self) {
        self.elapsed_ms = 0;
    }

    async fn run(
        &mut self,
        problem: ProblemNumber,
        tables: &mut TableManager,
    ) -> JudgeResult<RunStatus> {
        let run = self
            .runs
            .get(&problem)
            .cloned()
            .ok_or_else(|| JudgeError::Execution(format!("no solution for problem {}", problem)))?;

        match run {
            FakeRun::Output(table) => {
                self.elapsed_ms = 42;
                tables.write_result(&ResultTable {
                    problem_number: problem,
                    table,
                })?;
                Ok(RunStatus::Completed)
            }
            FakeRun::Status(status) => {
                self.elapsed_ms = 42;
                Ok(status)
            }
            FakeRun::Fail => Err(JudgeError::Execution("spawn failed".to_string())),
        }
    }

    fn elapsed_time(&self) -> i64 {
        self.elapsed_ms
    }
}

/// Engine over a fresh segment with fake collaborators
pub fn fake_engine(runs: Vec<(ProblemNumber, FakeRun)>) -> (JudgingEngine<()>, FakeTableLoader) {
    let segment = SharedMemorySegment::acquire(&unique_shm_name(), 1 << 20).unwrap();
    let loader = FakeTableLoader::default();
    let engine = JudgingEngine::new(
        segment,
        1 << 14,
        Box::new(loader.clone()),
        Box::new(FakeChecker::default()),
        Box::new(FakeRunner::new(runs)),
    )
    .unwrap();
    (engine, loader)
}

pub fn engine_with(runs: Vec<(ProblemNumber, FakeRun)>) -> JudgingEngine<()> {
    fake_engine(runs).0
}
