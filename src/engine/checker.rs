//! Expected answers and result comparison

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::constants::PROBLEM_ANSWERS_CATALOG;
use crate::engine::ResultChecker;
use crate::engine::rows::fetch_table;
use crate::error::{JudgeError, JudgeResult};
use crate::models::{ProblemAnswerRow, ProblemNumber, Row, Table, problem_number_from_db};

/// Outcome of comparing a result table with an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matches: bool,
    pub comment: String,
}

impl Comparison {
    fn correct() -> Self {
        Self {
            matches: true,
            comment: "correct".to_string(),
        }
    }

    fn mismatch(comment: String) -> Self {
        Self {
            matches: false,
            comment,
        }
    }
}

/// The expected table of one problem
#[derive(Debug, Clone)]
pub struct Answer {
    pub table: Table,
    /// Row order is part of the answer
    pub ordered: bool,
}

/// Expected answers keyed by problem number
#[derive(Debug, Clone, Default)]
pub struct AnswerSet {
    answers: HashMap<ProblemNumber, Answer>,
}

impl AnswerSet {
    pub fn insert(&mut self, problem: ProblemNumber, answer: Answer) {
        self.answers.insert(problem, answer);
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn clear(&mut self) {
        self.answers.clear();
    }

    /// Compare `result` with the answer of `problem`
    pub fn check(&self, result: &Table, problem: ProblemNumber) -> JudgeResult<Comparison> {
        let answer = self
            .answers
            .get(&problem)
            .ok_or(JudgeError::UnknownProblem(problem))?;
        Ok(compare_tables(&answer.table, result, answer.ordered))
    }
}

/// Compare `actual` against `expected`, naming the first discrepancy
pub fn compare_tables(expected: &Table, actual: &Table, ordered: bool) -> Comparison {
    if !actual.is_well_formed() {
        return Comparison::mismatch("malformed result: row width differs from column count".to_string());
    }

    if expected.columns.len() != actual.columns.len() {
        return Comparison::mismatch(format!(
            "column count differs: expected {}, got {}",
            expected.columns.len(),
            actual.columns.len()
        ));
    }

    for (index, (want, got)) in expected.columns.iter().zip(&actual.columns).enumerate() {
        if !want.eq_ignore_ascii_case(got) {
            return Comparison::mismatch(format!(
                "column {} differs: expected '{}', got '{}'",
                index + 1,
                want,
                got
            ));
        }
    }

    if expected.rows.len() != actual.rows.len() {
        return Comparison::mismatch(format!(
            "row count differs: expected {}, got {}",
            expected.rows.len(),
            actual.rows.len()
        ));
    }

    if ordered {
        for (index, (want, got)) in expected.rows.iter().zip(&actual.rows).enumerate() {
            if !rows_match(want, got) {
                return Comparison::mismatch(format!(
                    "row {} differs: expected {}, got {}",
                    index + 1,
                    format_row(want),
                    format_row(got)
                ));
            }
        }
        return Comparison::correct();
    }

    let want = sorted(&expected.rows);
    let got = sorted(&actual.rows);
    match want.iter().zip(&got).find(|(w, g)| !rows_match(w, g)) {
        Some((_, unexpected)) => {
            Comparison::mismatch(format!("unexpected row {}", format_row(unexpected)))
        }
        None => Comparison::correct(),
    }
}

fn rows_match(a: &Row, b: &Row) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
}

fn sorted(rows: &[Row]) -> Vec<&Row> {
    let mut rows: Vec<&Row> = rows.iter().collect();
    rows.sort_by(|a, b| compare_rows(a, b));
    rows
}

fn compare_rows(a: &Row, b: &Row) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

fn format_row(row: &Row) -> String {
    let values: Vec<String> = row.iter().map(ToString::to_string).collect();
    format!("({})", values.join(", "))
}

/// Checker reading answer queries from the problem database
#[derive(Debug, Default)]
pub struct PgResultChecker {
    answers: AnswerSet,
    comment: String,
}

impl PgResultChecker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultChecker<PgPool> for PgResultChecker {
    async fn load_answers(&mut self, pool: &PgPool) -> JudgeResult<()> {
        let sql = format!(
            "SELECT problem_number, answer_query, ordered FROM {} ORDER BY problem_number",
            PROBLEM_ANSWERS_CATALOG
        );
        let catalog: Vec<ProblemAnswerRow> = sqlx::query_as(&sql)
            .fetch_all(pool)
            .await
            .map_err(|e| JudgeError::AnswerLoad(e.to_string()))?;

        if catalog.is_empty() {
            return Err(JudgeError::AnswerLoad(format!(
                "{} has no answers",
                PROBLEM_ANSWERS_CATALOG
            )));
        }

        self.answers.clear();
        for entry in catalog {
            let problem = problem_number_from_db(entry.problem_number).ok_or_else(|| {
                JudgeError::AnswerLoad(format!("invalid problem number {}", entry.problem_number))
            })?;
            let table = fetch_table(pool, &entry.answer_query)
                .await
                .map_err(|e| JudgeError::AnswerLoad(format!("problem {}: {}", problem, e)))?;

            tracing::debug!(problem, rows = table.rows.len(), "Loaded expected answer");
            self.answers.insert(
                problem,
                Answer {
                    table,
                    ordered: entry.ordered,
                },
            );
        }

        tracing::info!(count = self.answers.len(), "Expected answers loaded");
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
