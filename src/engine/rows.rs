//! Conversion of PostgreSQL rows into judge tables

use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, PgPool, Row, TypeInfo};

use crate::models::{Table, Value};

/// Run `sql` and collect its result set, keeping column names even when
/// no row comes back.
///
/// Columns of types without a native decoding are cast in the database:
/// NUMERIC to `float8`, anything else (dates, timestamps, intervals...) to
/// `text`.
pub async fn fetch_table(pool: &PgPool, sql: &str) -> Result<Table, sqlx::Error> {
    let described: Vec<(String, String)> = pool
        .describe(sql)
        .await?
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
        .collect();

    let rows: Vec<PgRow> = match with_casts(sql, &described) {
        Some(cast) => {
            tracing::debug!(query = %cast, "Casting columns without native decoding");
            sqlx::query(&cast).fetch_all(pool).await?
        }
        None => sqlx::query(sql).fetch_all(pool).await?,
    };

    let columns = described.into_iter().map(|(name, _)| name).collect();
    let mut table = Table::new(columns);
    for row in &rows {
        table.rows.push(row_values(row)?);
    }
    Ok(table)
}

/// Cast target for a column type `value_at` cannot decode
fn column_cast(type_name: &str) -> Option<&'static str> {
    match type_name {
        "BOOL" | "INT2" | "INT4" | "INT8" | "FLOAT4" | "FLOAT8" | "TEXT" | "VARCHAR"
        | "BPCHAR" | "NAME" => None,
        "NUMERIC" => Some("float8"),
        _ => Some("text"),
    }
}

/// Wrap `sql` so every column decodes natively, or `None` if it already does.
///
/// The inner columns are renamed positionally, so duplicate or unnamed
/// columns survive, and the original names are restored on the way out.
fn with_casts(sql: &str, columns: &[(String, String)]) -> Option<String> {
    if columns.iter().all(|(_, type_name)| column_cast(type_name).is_none()) {
        return None;
    }

    let aliases: Vec<String> = (1..=columns.len()).map(|i| format!("c{}", i)).collect();
    let select: Vec<String> = columns
        .iter()
        .zip(&aliases)
        .map(|((name, type_name), alias)| match column_cast(type_name) {
            Some(cast) => format!("{}::{} AS {}", alias, cast, quote_name(name)),
            None => format!("{} AS {}", alias, quote_name(name)),
        })
        .collect();

    let inner = sql.trim().trim_end_matches(';');
    Some(format!(
        "SELECT {} FROM (\n{}\n) AS judged({})",
        select.join(", "),
        inner,
        aliases.join(", ")
    ))
}

fn row_values(row: &PgRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|index| value_at(row, index)).collect()
}

fn value_at(row: &PgRow, index: usize) -> Result<Value, sqlx::Error> {
    let type_name = row.column(index).type_info().name();

    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(Value::Text)
        }
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: row.column(index).name().to_string(),
                source: format!("unsupported column type {}; cast it in the query", other).into(),
            });
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Quote a possibly schema-qualified table name
pub fn quote_identifier(name: &str) -> String {
    name.split('.').map(quote_name).collect::<Vec<_>>().join(".")
}

fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
