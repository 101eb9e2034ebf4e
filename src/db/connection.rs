//! Database connection management
//!
//! Postgres pools (sqlx) serve the metrics store; SQLite connections
//! (rusqlite) hold checkpoints and history.

use crate::error::{ChatError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;

/// Initialize the metrics database connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Open (or create) a SQLite file for conversation state.
pub fn open_state_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    Ok(conn)
}

pub fn open_state_db_in_memory() -> Result<Connection> {
    Ok(Connection::open_in_memory()?)
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort
/// lexicographically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChatError::Persistence(format!("Bad timestamp '{}': {}", raw, e)))
}
