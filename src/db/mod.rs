//! Durable conversation state
//!
//! Two collaborators back thread resumption:
//! - [`CheckpointStore`]: append-only snapshots of the working state, each
//!   pointing at the previous checkpoint of the same thread
//! - [`HistoryStore`]: append-only log of turns, used to rebuild prompt
//!   history and to find earlier statements
//!
//! Both ship with a SQLite implementation. Their connection is never the
//! one used to run user statements.

pub mod checkpoints;
pub mod connection;
pub mod conversation;

use crate::error::Result;
use crate::state::Intent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use checkpoints::{decode_state, encode_state, SqliteCheckpointStore};
pub use conversation::{SqliteHistoryStore, MAX_BOT_RESPONSE_LENGTH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub thread_id: String,
    pub checkpoint_id: String,
    pub parent_checkpoint_id: Option<String>,
    /// Serialized working state, see [`encode_state`].
    pub state_blob: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint. Existing rows are never updated.
    async fn put(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        parent_checkpoint_id: Option<&str>,
        state_blob: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// Append a checkpoint whose parent is the thread's latest one, picking
    /// the parent and inserting atomically. Returns the parent id.
    async fn append(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        state_blob: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<String>>;

    /// A specific checkpoint, or the thread's latest when `checkpoint_id` is `None`.
    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>>;

    /// Up to `limit` checkpoints, newest first.
    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<Checkpoint>>;

    /// Remove every checkpoint of a thread, returning how many went.
    async fn delete_by_thread(&self, thread_id: &str) -> Result<u64>;
}

/// One persisted exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub thread_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub intent: Option<String>,
    pub generated_statement: Option<String>,
    pub action_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A turn about to be recorded.
#[derive(Debug, Clone, Default)]
pub struct NewTurn {
    pub thread_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub intent: Option<Intent>,
    pub generated_statement: Option<String>,
    pub action_token: Option<String>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record a turn. `bot_response` is capped at
    /// [`MAX_BOT_RESPONSE_LENGTH`] characters plus an ellipsis.
    async fn add_turn(&self, turn: NewTurn) -> Result<Turn>;

    /// The thread's last `limit` turns, oldest first.
    async fn get_recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Latest turn that carries a statement.
    async fn get_most_recent_statement(&self, thread_id: &str) -> Result<Option<Turn>>;

    /// Latest turn with a statement whose user message contains `keyword`
    /// (case-insensitive).
    async fn find_statement_by_keyword(&self, thread_id: &str, keyword: &str)
        -> Result<Option<Turn>>;

    async fn get_turn_by_action_token(&self, token: &str) -> Result<Option<Turn>>;

    /// Delete turns older than `max_age`, returning how many went.
    async fn cleanup_older_than(&self, max_age: Duration) -> Result<u64>;
}
