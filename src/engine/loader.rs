//! Reference table loading from the problem database

use async_trait::async_trait;
use sqlx::PgPool;

use crate::constants::PROBLEM_TABLES_CATALOG;
use crate::engine::rows::{fetch_table, quote_identifier};
use crate::engine::{TableLoader, TableManager};
use crate::error::{JudgeError, JudgeResult};
use crate::models::{ProblemTableRow, problem_number_from_db};

/// Copies every catalogued reference table into shared memory
#[derive(Debug, Default, Clone, Copy)]
pub struct PgTableLoader;

#[async_trait]
impl TableLoader<PgPool> for PgTableLoader {
    async fn load(&self, pool: &PgPool, tables: &mut TableManager) -> JudgeResult<()> {
        let sql = format!(
            "SELECT problem_number, table_name FROM {} ORDER BY problem_number, table_name",
            PROBLEM_TABLES_CATALOG
        );
        let catalog: Vec<ProblemTableRow> = sqlx::query_as(&sql)
            .fetch_all(pool)
            .await
            .map_err(|e| JudgeError::TableLoad(e.to_string()))?;

        if catalog.is_empty() {
            return Err(JudgeError::TableLoad(format!(
                "{} lists no reference tables",
                PROBLEM_TABLES_CATALOG
            )));
        }

        for entry in &catalog {
            let problem = problem_number_from_db(entry.problem_number).ok_or_else(|| {
                JudgeError::TableLoad(format!("invalid problem number {}", entry.problem_number))
            })?;

            let select = format!("SELECT * FROM {}", quote_identifier(&entry.table_name));
            let table = fetch_table(pool, &select)
                .await
                .map_err(|e| JudgeError::TableLoad(format!("{}: {}", entry.table_name, e)))?;

            tracing::debug!(
                problem,
                table = %entry.table_name,
                rows = table.rows.len(),
                "Staged reference table"
            );
            tables.store_reference(problem, &entry.table_name, &table)?;
        }

        tracing::info!(
            tables = catalog.len(),
            problems = tables.problem_count(),
            "Reference tables loaded"
        );
        Ok(())
    }
}
