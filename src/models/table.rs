//! Table model shared by reference data, answers and solution output

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::constants::FLOAT_TOLERANCE;
use crate::models::ProblemNumber;

/// A single cell value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Equality used by the checker; integers and floats compare numerically
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => floats_match(*a, *b),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                floats_match(*a as f64, *b)
            }
            _ => false,
        }
    }

    /// Total order used to sort rows before an unordered comparison.
    ///
    /// Values that `matches` exactly always compare equal: numbers of either
    /// type are ordered numerically, integers exactly and `-0.0` as `0.0`.
    pub(crate) fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => normalized(*a).total_cmp(&normalized(*b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(&normalized(*b)),
            (Value::Float(a), Value::Int(b)) => normalized(*a).total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

fn normalized(x: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
        }
    }
}

fn floats_match(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    (a - b).abs() <= FLOAT_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

pub type Row = Vec<Value>;

/// Column names plus rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row must have one value per column
    pub fn is_well_formed(&self) -> bool {
        self.rows.iter().all(|row| row.len() == self.columns.len())
    }
}

/// The output of one solution run, staged in the result region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultTable {
    /// Problem the table was allocated for
    pub problem_number: ProblemNumber,
    pub table: Table,
}
