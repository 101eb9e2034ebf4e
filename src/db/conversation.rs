//! SQLite history store - append-only turn log per thread

use crate::db::connection::{format_timestamp, open_state_db, open_state_db_in_memory, parse_timestamp};
use crate::db::{HistoryStore, NewTurn, Turn};
use crate::error::{ChatError, Result};
use crate::text::truncate_with_ellipsis;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Persisted bot responses are cut to this many characters.
pub const MAX_BOT_RESPONSE_LENGTH: usize = 500;

const TURN_COLUMNS: &str = "id, thread_id, user_message, bot_response, intent, \
                            generated_statement, action_token, created_at";

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(open_state_db(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(open_state_db_in_memory()?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversation_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                bot_response TEXT NOT NULL,
                intent TEXT,
                generated_statement TEXT,
                action_token TEXT UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_thread_created
                ON conversation_turns (thread_id, created_at);",
        )?;
        info!("History store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ChatError::Persistence("History store lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ChatError::Persistence(format!("History worker failed: {}", e)))?
    }

    /// First row of `sql`, bound to `args` in order.
    async fn query_one(&self, sql: String, args: Vec<String>) -> Result<Option<Turn>> {
        let raw = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(&sql, rusqlite::params_from_iter(args.iter()), RawTurn::from_row)
                    .optional()?)
            })
            .await?;
        raw.map(RawTurn::decode).transpose()
    }
}

struct RawTurn {
    id: i64,
    thread_id: String,
    user_message: String,
    bot_response: String,
    intent: Option<String>,
    generated_statement: Option<String>,
    action_token: Option<String>,
    created_at: String,
}

impl RawTurn {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            user_message: row.get(2)?,
            bot_response: row.get(3)?,
            intent: row.get(4)?,
            generated_statement: row.get(5)?,
            action_token: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Turn> {
        Ok(Turn {
            id: self.id,
            thread_id: self.thread_id,
            user_message: self.user_message,
            bot_response: self.bot_response,
            intent: self.intent,
            generated_statement: self.generated_statement,
            action_token: self.action_token,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Escape LIKE wildcards so a keyword matches literally.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn add_turn(&self, turn: NewTurn) -> Result<Turn> {
        let bot_response = truncate_with_ellipsis(&turn.bot_response, MAX_BOT_RESPONSE_LENGTH);
        let created_at = Utc::now();
        let intent = turn.intent.map(|i| i.as_str().to_string());
        let row = (
            turn.thread_id.clone(),
            turn.user_message.clone(),
            bot_response.clone(),
            intent.clone(),
            turn.generated_statement.clone(),
            turn.action_token.clone(),
            format_timestamp(&created_at),
        );
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO conversation_turns
                        (thread_id, user_message, bot_response, intent, generated_statement, action_token, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![row.0, row.1, row.2, row.3, row.4, row.5, row.6],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(thread_id = %turn.thread_id, turn_id = id, "Turn recorded");
        Ok(Turn {
            id,
            thread_id: turn.thread_id,
            user_message: turn.user_message,
            bot_response,
            intent,
            generated_statement: turn.generated_statement,
            action_token: turn.action_token,
            created_at,
        })
    }

    async fn get_recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let thread = thread_id.to_string();
        let raws = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM conversation_turns WHERE thread_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    TURN_COLUMNS
                ))?;
                let rows = stmt.query_map(params![thread, limit as i64], RawTurn::from_row)?;
                let mut out = Vec::new();
                for raw in rows {
                    out.push(raw?);
                }
                Ok(out)
            })
            .await?;
        // Newest-first from the query; callers want chronological order.
        let mut turns = raws
            .into_iter()
            .map(RawTurn::decode)
            .collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn get_most_recent_statement(&self, thread_id: &str) -> Result<Option<Turn>> {
        self.query_one(
            format!(
                "SELECT {} FROM conversation_turns
                 WHERE thread_id = ?1 AND generated_statement IS NOT NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                TURN_COLUMNS
            ),
            vec![thread_id.to_string()],
        )
        .await
    }

    async fn find_statement_by_keyword(
        &self,
        thread_id: &str,
        keyword: &str,
    ) -> Result<Option<Turn>> {
        self.query_one(
            format!(
                "SELECT {} FROM conversation_turns
                 WHERE thread_id = ?1 AND generated_statement IS NOT NULL
                   AND user_message LIKE ?2 ESCAPE '\\'
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                TURN_COLUMNS
            ),
            vec![thread_id.to_string(), like_pattern(keyword)],
        )
        .await
    }

    async fn get_turn_by_action_token(&self, token: &str) -> Result<Option<Turn>> {
        self.query_one(
            format!(
                "SELECT {} FROM conversation_turns WHERE action_token = ?1",
                TURN_COLUMNS
            ),
            vec![token.to_string()],
        )
        .await
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> Result<u64> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| ChatError::Config(format!("Retention window out of range: {}", e)))?;
        let cutoff = format_timestamp(&(Utc::now() - age));
        let n = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM conversation_turns WHERE created_at < ?1",
                    params![cutoff],
                )?)
            })
            .await?;
        info!(deleted = n, "Cleaned up old conversation turns");
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Intent;
    use tempfile::TempDir;

    fn turn(thread: &str, user: &str, statement: Option<&str>) -> NewTurn {
        NewTurn {
            thread_id: thread.to_string(),
            user_message: user.to_string(),
            bot_response: format!("answer to {}", user),
            intent: Some(Intent::AnalyticsQuery),
            generated_statement: statement.map(str::to_string),
            action_token: None,
        }
    }

    #[tokio::test]
    async fn test_long_bot_response_truncated_with_marker() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let mut t = turn("t1", "q", None);
        t.bot_response = "y".repeat(1200);
        let saved = store.add_turn(t).await.unwrap();
        assert_eq!(saved.bot_response.chars().count(), MAX_BOT_RESPONSE_LENGTH + 3);
        assert!(saved.bot_response.ends_with("..."));

        let loaded = store.get_recent_turns("t1", 10).await.unwrap();
        assert_eq!(loaded[0].bot_response, saved.bot_response);
    }

    #[tokio::test]
    async fn test_short_bot_response_kept() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let saved = store.add_turn(turn("t1", "q", None)).await.unwrap();
        assert_eq!(saved.bot_response, "answer to q");
        assert_eq!(saved.intent.as_deref(), Some("analytics_query"));
    }

    #[tokio::test]
    async fn test_recent_turns_are_oldest_first_and_limited() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        for i in 0..5 {
            store.add_turn(turn("t1", &format!("q{}", i), None)).await.unwrap();
        }
        store.add_turn(turn("t2", "other", None)).await.unwrap();

        let recent = store.get_recent_turns("t1", 3).await.unwrap();
        let users: Vec<&str> = recent.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn test_statement_lookups() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        store
            .add_turn(turn("t1", "Revenue by country", Some("SELECT country FROM app_metrics")))
            .await
            .unwrap();
        store
            .add_turn(turn("t1", "Installs for Android", Some("SELECT SUM(installs) FROM app_metrics")))
            .await
            .unwrap();
        store.add_turn(turn("t1", "thanks!", None)).await.unwrap();

        let latest = store.get_most_recent_statement("t1").await.unwrap().unwrap();
        assert_eq!(latest.user_message, "Installs for Android");

        let by_kw = store.find_statement_by_keyword("t1", "REVENUE").await.unwrap().unwrap();
        assert_eq!(by_kw.generated_statement.as_deref(), Some("SELECT country FROM app_metrics"));

        assert!(store.find_statement_by_keyword("t1", "100%").await.unwrap().is_none());
        assert!(store.get_most_recent_statement("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_action_token_lookup() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let mut t = turn("t1", "How many apps?", Some("SELECT 1"));
        t.action_token = Some("tok-123".into());
        store.add_turn(t).await.unwrap();

        let found = store.get_turn_by_action_token("tok-123").await.unwrap().unwrap();
        assert_eq!(found.user_message, "How many apps?");
        assert!(store.get_turn_by_action_token("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_waits_off_the_runtime_thread() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let conn = Arc::clone(&store.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        locked_rx.recv().unwrap();

        // Single-threaded runtime: the timer only fires if the lookup yields.
        let lookup = store.get_recent_turns("t1", 10);
        tokio::pin!(lookup);
        tokio::select! {
            _ = &mut lookup => panic!("lookup finished while the connection was held"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert!(lookup.await.unwrap().is_empty());
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_turns() {
        let dir = TempDir::new().unwrap();
        let store = SqliteHistoryStore::open(dir.path().join("history.db")).unwrap();
        store.add_turn(turn("t1", "fresh", None)).await.unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO conversation_turns (thread_id, user_message, bot_response, created_at)
                 VALUES ('t1', 'stale', 'old', '2000-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();
        }
        let removed = store.cleanup_older_than(Duration::from_secs(24 * 3600)).await.unwrap();
        assert_eq!(removed, 1);
        let left = store.get_recent_turns("t1", 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_message, "fresh");
    }
}
