//! Shared SQL plumbing for the target tables.

use crate::types::models::TableName;
use crate::utils::error::Result;
use sqlx::PgPool;

/// Longest identifier Postgres keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Index name for `table`, shortened so the suffix always survives.
#[must_use]
pub fn index_name(table: &TableName, suffix: &str) -> String {
    let room = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len() + 1);
    let prefix: String = table.as_str().chars().take(room).collect();
    format!("{prefix}_{suffix}")
}

/// Runs DDL statements in order, each on its own.
pub async fn run_ddl(db: &PgPool, statements: &[String]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(db).await?;
    }
    Ok(())
}

/// `CREATE INDEX IF NOT EXISTS` on `columns`.
#[must_use]
pub fn create_index(table: &TableName, suffix: &str, columns: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {table} ({columns})",
        index_name(table, suffix)
    )
}

/// Converts a slot for binding into a `BIGINT` column.
#[must_use]
pub fn slot_param(slot: u64) -> i64 {
    i64::try_from(slot).unwrap_or(i64::MAX)
}

/// Positive values only; zero and negatives mean "not provided".
#[must_use]
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}
