//! SQLite engine - local metrics store, used for development and tests

use crate::error::{ChatError, Result};
use crate::execution::engine::QueryEngine;
use crate::execution::result::{record_from, QueryOutput, SqlScalar};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    /// Open a metrics database file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection (e.g. a seeded in-memory database).
    /// The connection is switched to query-only mode.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, statement: &str) -> Result<QueryOutput> {
        let conn = Arc::clone(&self.conn);
        let statement = statement.to_string();
        let output = tokio::task::spawn_blocking(move || run_statement(&conn, &statement))
            .await
            .map_err(|e| ChatError::Execution(format!("SQLite worker failed: {}", e)))??;
        info!(engine = "sqlite", rows = output.row_count(), "Statement executed");
        Ok(output)
    }
}

fn run_statement(conn: &Mutex<Connection>, statement: &str) -> Result<QueryOutput> {
    let mut conn = conn
        .lock()
        .map_err(|_| ChatError::Execution("SQLite connection lock poisoned".to_string()))?;
    let tx = conn.transaction()?;
    let output = {
        let mut stmt = tx.prepare(statement)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(scalar_from(row.get_ref(idx)?));
            }
            records.push(record_from(&columns, values));
        }
        QueryOutput {
            columns,
            rows: records,
        }
    };
    tx.rollback()?;
    Ok(output)
}

fn scalar_from(value: ValueRef<'_>) -> SqlScalar {
    match value {
        ValueRef::Null => SqlScalar::Null,
        ValueRef::Integer(i) => SqlScalar::Int(i),
        ValueRef::Real(f) => SqlScalar::Float(f),
        ValueRef::Text(bytes) => SqlScalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlScalar::Text(format!("<{} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SqliteEngine {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE app_metrics (app_name TEXT, platform TEXT, installs INTEGER, ads_revenue REAL);
             INSERT INTO app_metrics VALUES ('Paint', 'Android', 10, 1.5);
             INSERT INTO app_metrics VALUES ('Paint', 'iOS', 5, NULL);",
        )
        .unwrap();
        SqliteEngine::from_connection(conn).unwrap()
    }

    #[tokio::test]
    async fn test_select_returns_rows_and_columns() {
        let out = engine()
            .execute("SELECT platform, installs FROM app_metrics ORDER BY platform")
            .await
            .unwrap();
        assert_eq!(out.columns, vec!["platform", "installs"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.rows[0]["platform"], serde_json::json!("Android"));
        assert_eq!(out.rows[1]["installs"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let out = engine()
            .execute("SELECT app_name FROM app_metrics WHERE installs > 1000")
            .await
            .unwrap();
        assert_eq!(out.columns, vec!["app_name"]);
        assert!(out.rows.is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_refused() {
        let engine = engine();
        let err = engine.execute("DELETE FROM app_metrics").await;
        assert!(err.is_err());
        let out = engine.execute("SELECT COUNT(*) AS n FROM app_metrics").await.unwrap();
        assert_eq!(out.rows[0]["n"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_unknown_table_is_an_error() {
        assert!(engine().execute("SELECT * FROM nope").await.is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        assert!(engine().health_check().await.is_ok());
    }
}
