//! Postgres engine - runs statements against the metrics database through sqlx
//!
//! Each statement runs in its own transaction that is marked read-only,
//! carries a local statement timeout and is always rolled back.

use crate::error::{ChatError, Result};
use crate::execution::engine::QueryEngine;
use crate::execution::result::{record_from, QueryOutput, SqlScalar};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

pub struct PostgresEngine {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresEngine {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl QueryEngine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, statement: &str) -> Result<QueryOutput> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let timeout = format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&timeout).execute(&mut *tx).await?;

        // Prepared first so column names are known even for empty results.
        let prepared = (&mut *tx).prepare(statement).await;
        let outcome = match prepared {
            Ok(prepared) => {
                let columns: Vec<String> = prepared
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                match sqlx::query(statement).fetch_all(&mut *tx).await {
                    Ok(rows) => rows
                        .iter()
                        .map(|row| decode_row(row, &columns))
                        .collect::<Result<Vec<_>>>()
                        .map(|rows| QueryOutput { columns, rows }),
                    Err(e) => Err(ChatError::from(e)),
                }
            }
            Err(e) => Err(ChatError::from(e)),
        };

        // Rolled back on success and failure alike.
        tx.rollback().await?;

        let output = outcome?;
        info!(
            engine = "postgres",
            rows = output.row_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(output)
    }
}

fn decode_row(row: &PgRow, columns: &[String]) -> Result<crate::execution::result::Record> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in row.columns().iter().enumerate() {
        values.push(decode_cell(row, idx, column.type_info().name())?);
    }
    Ok(record_from(columns, values))
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlScalar> {
    fn opt<T>(v: Option<T>, f: impl FnOnce(T) -> SqlScalar) -> SqlScalar {
        v.map(f).unwrap_or(SqlScalar::Null)
    }

    let value = match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)?, SqlScalar::Bool),
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx)?, |v| SqlScalar::Int(v.into())),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx)?, |v| SqlScalar::Int(v.into())),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx)?, SqlScalar::Int),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx)?, |v| SqlScalar::Float(v.into())),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx)?, SqlScalar::Float),
        "NUMERIC" => opt(row.try_get::<Option<Decimal>, _>(idx)?, SqlScalar::Decimal),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(idx)?, SqlScalar::Date),
        "TIMESTAMP" => opt(row.try_get::<Option<NaiveDateTime>, _>(idx)?, SqlScalar::Timestamp),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<DateTime<Utc>>, _>(idx)?, SqlScalar::TimestampTz),
        "TIME" => opt(row.try_get::<Option<NaiveTime>, _>(idx)?, SqlScalar::Time),
        "UUID" => opt(row.try_get::<Option<Uuid>, _>(idx)?, SqlScalar::Uuid),
        "JSON" | "JSONB" => opt(row.try_get::<Option<serde_json::Value>, _>(idx)?, SqlScalar::Json),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            opt(row.try_get::<Option<String>, _>(idx)?, SqlScalar::Text)
        }
        other => match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => opt(v, SqlScalar::Text),
            Err(e) => {
                debug!(column_type = other, error = %e, "Unsupported column type, emitting null");
                SqlScalar::Null
            }
        },
    };
    Ok(value)
}
