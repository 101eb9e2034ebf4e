//! SQLite checkpoint store
//!
//! One row per completed turn. Rows are append-only; the latest checkpoint
//! of a thread is the one with the greatest `created_at` (ties broken by
//! insertion order).

use crate::db::connection::{format_timestamp, open_state_db, open_state_db_in_memory, parse_timestamp};
use crate::db::{Checkpoint, CheckpointStore};
use crate::error::{ChatError, Result};
use crate::state::WorkingState;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const STATE_BLOB_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateEnvelope {
    version: u32,
    state: WorkingState,
}

/// Serialize a working state into a self-describing blob.
pub fn encode_state(state: &WorkingState) -> Result<String> {
    serde_json::to_string(&StateEnvelope {
        version: STATE_BLOB_VERSION,
        state: state.clone(),
    })
    .map_err(|e| ChatError::Serialization(format!("Failed to encode state: {}", e)))
}

pub fn decode_state(blob: &str) -> Result<WorkingState> {
    let envelope: StateEnvelope = serde_json::from_str(blob)
        .map_err(|e| ChatError::Serialization(format!("Failed to decode state: {}", e)))?;
    if envelope.version != STATE_BLOB_VERSION {
        return Err(ChatError::Serialization(format!(
            "Unsupported state blob version {}",
            envelope.version
        )));
    }
    Ok(envelope.state)
}

pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str =
    "id, thread_id, checkpoint_id, parent_checkpoint_id, state_blob, metadata, created_at";

impl SqliteCheckpointStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(open_state_db(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(open_state_db_in_memory()?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                parent_checkpoint_id TEXT,
                state_blob TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE (thread_id, checkpoint_id)
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_created
                ON checkpoints (thread_id, created_at);",
        )?;
        info!("Checkpoint store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ChatError::Persistence("Checkpoint store lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ChatError::Persistence(format!("Checkpoint worker failed: {}", e)))?
    }
}

fn insert_checkpoint(
    conn: &Connection,
    thread_id: &str,
    checkpoint_id: &str,
    parent_checkpoint_id: Option<&str>,
    state_blob: &str,
    metadata: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO checkpoints
            (thread_id, checkpoint_id, parent_checkpoint_id, state_blob, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            thread_id,
            checkpoint_id,
            parent_checkpoint_id,
            state_blob,
            metadata,
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}

fn latest_checkpoint_id(conn: &Connection, thread_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT checkpoint_id FROM checkpoints WHERE thread_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![thread_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Row as stored; text columns are decoded in [`RawCheckpoint::decode`].
struct RawCheckpoint {
    id: i64,
    thread_id: String,
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    state_blob: String,
    metadata: String,
    created_at: String,
}

impl RawCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            checkpoint_id: row.get(2)?,
            parent_checkpoint_id: row.get(3)?,
            state_blob: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            id: self.id,
            thread_id: self.thread_id,
            checkpoint_id: self.checkpoint_id,
            parent_checkpoint_id: self.parent_checkpoint_id,
            state_blob: self.state_blob,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        parent_checkpoint_id: Option<&str>,
        state_blob: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let thread = thread_id.to_string();
        let id = checkpoint_id.to_string();
        let parent = parent_checkpoint_id.map(str::to_string);
        let blob = state_blob.to_string();
        let meta = metadata.to_string();
        self.with_conn(move |conn| {
            insert_checkpoint(conn, &thread, &id, parent.as_deref(), &blob, &meta)
        })
        .await?;
        debug!(thread_id, checkpoint_id, ?parent_checkpoint_id, "Checkpoint written");
        Ok(())
    }

    async fn append(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        state_blob: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<String>> {
        let thread = thread_id.to_string();
        let id = checkpoint_id.to_string();
        let blob = state_blob.to_string();
        let meta = metadata.to_string();
        let parent = self
            .with_conn(move |conn| {
                // IMMEDIATE takes the write lock before reading the parent, so
                // other writers on the same file wait for this insert.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let parent = latest_checkpoint_id(&tx, &thread)?;
                insert_checkpoint(&tx, &thread, &id, parent.as_deref(), &blob, &meta)?;
                tx.commit()?;
                Ok(parent)
            })
            .await?;
        debug!(thread_id, checkpoint_id, parent = ?parent, "Checkpoint appended");
        Ok(parent)
    }

    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>> {
        let thread = thread_id.to_string();
        let id = checkpoint_id.map(str::to_string);
        let raw = self
            .with_conn(move |conn| {
                let raw = match id {
                    Some(id) => conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM checkpoints WHERE thread_id = ?1 AND checkpoint_id = ?2",
                                SELECT_COLUMNS
                            ),
                            params![thread, id],
                            RawCheckpoint::from_row,
                        )
                        .optional()?,
                    None => conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM checkpoints WHERE thread_id = ?1
                                 ORDER BY created_at DESC, id DESC LIMIT 1",
                                SELECT_COLUMNS
                            ),
                            params![thread],
                            RawCheckpoint::from_row,
                        )
                        .optional()?,
                };
                Ok(raw)
            })
            .await?;
        raw.map(RawCheckpoint::decode).transpose()
    }

    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        let thread = thread_id.to_string();
        let raws = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM checkpoints WHERE thread_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![thread, limit as i64], RawCheckpoint::from_row)?;
                let mut out = Vec::new();
                for raw in rows {
                    out.push(raw?);
                }
                Ok(out)
            })
            .await?;
        raws.into_iter().map(RawCheckpoint::decode).collect()
    }

    async fn delete_by_thread(&self, thread_id: &str) -> Result<u64> {
        let thread = thread_id.to_string();
        let n = self
            .with_conn(move |conn| {
                Ok(conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread])?)
            })
            .await?;
        info!(thread_id, deleted = n, "Deleted thread checkpoints");
        Ok(n as u64)
    }
}
