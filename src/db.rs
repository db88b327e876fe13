use crate::error::PipelineError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// One record per operator per day is enforced by the pipeline (merge rule
/// plus the pruner), not by the schema, so the day index stays non-unique.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS operator (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS performance (
        operator_id INTEGER NOT NULL REFERENCES operator(id),
        ppm REAL NOT NULL,
        record_date TEXT NOT NULL,
        record_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_performance_operator_day
        ON performance (operator_id, record_date)
    "#,
];

pub async fn build_pool(path: &Path, max_connections: u32) -> Result<SqlitePool, PipelineError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create tables if missing. Safe to run before every store-touching command.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), PipelineError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // A single connection keeps every statement on the same :memory: db.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    init_schema(&pool).await.expect("schema");
    pool
}
