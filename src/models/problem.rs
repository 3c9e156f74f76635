//! Problem catalog rows

use sqlx::FromRow;

/// Problems are identified by number
pub type ProblemNumber = u32;

/// One reference table belonging to a problem
#[derive(Debug, Clone, FromRow)]
pub struct ProblemTableRow {
    pub problem_number: i32,
    pub table_name: String,
}

/// The query producing a problem's expected answer
#[derive(Debug, Clone, FromRow)]
pub struct ProblemAnswerRow {
    pub problem_number: i32,
    pub answer_query: String,
    /// Whether row order is part of the answer
    pub ordered: bool,
}

/// Convert a catalog problem number, rejecting negatives
pub fn problem_number_from_db(raw: i32) -> Option<ProblemNumber> {
    ProblemNumber::try_from(raw).ok()
}
