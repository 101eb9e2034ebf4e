//! Execution Module - read-only query engines for the metrics store
//!
//! - QueryEngine trait implemented by each backend
//! - QueryOutput / SqlScalar for engine-neutral, JSON-safe results
//! - Postgres (sqlx) and SQLite (rusqlite) engines

pub mod engine;
pub mod postgres_engine;
pub mod result;
pub mod sqlite_engine;

pub use engine::QueryEngine;
pub use postgres_engine::PostgresEngine;
pub use result::{QueryOutput, Record, SqlScalar};
pub use sqlite_engine::SqliteEngine;
