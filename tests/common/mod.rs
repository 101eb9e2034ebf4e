#![allow(dead_code)]

use async_trait::async_trait;
use metrics_chat::agent_prompts::{PromptKind, RenderedPrompt};
use metrics_chat::config::{CacheDurability, Settings};
use metrics_chat::db::{Checkpoint, CheckpointStore, HistoryStore, NewTurn, Turn};
use metrics_chat::db::{SqliteCheckpointStore, SqliteHistoryStore};
use metrics_chat::error::{ChatError, Result};
use metrics_chat::execution::{QueryEngine, QueryOutput, SqliteEngine};
use metrics_chat::llm::LanguageModel;
use metrics_chat::service::ChatService;
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CLASSIFY_ANALYTICS: &str = r#"{"intent": "analytics_query", "confidence": 0.9}"#;
pub const CLASSIFY_FOLLOW_UP: &str = r#"{"intent": "follow_up", "confidence": 0.85}"#;

/// Model double: replies are queued per prompt kind and every prompt is kept.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<PromptKind, VecDeque<Result<String>>>>,
    pub prompts: Mutex<Vec<RenderedPrompt>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, kind: PromptKind, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn then_fail(self, kind: PromptKind) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(Err(ChatError::Llm("503 Service Unavailable".into())));
        self
    }

    /// Queue a full analytics answer: classification, statement, summary.
    pub fn answer(self, statement: &str, summary: &str) -> Self {
        let generation = serde_json::json!({ "statement": statement, "assumptions": [] });
        self.then(PromptKind::IntentClassification, CLASSIFY_ANALYTICS)
            .then(PromptKind::StatementGeneration, &generation.to_string())
            .then(PromptKind::Interpretation, summary)
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn calls_of(&self, kind: PromptKind) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.kind == kind)
            .count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .get_mut(&prompt.kind)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Err(ChatError::Llm(format!("nothing scripted for {:?}", prompt.kind))))
    }
}

/// Counts statements that reach the wrapped engine.
pub struct CountingEngine {
    inner: SqliteEngine,
    pub executed: AtomicUsize,
}

impl CountingEngine {
    pub fn seeded() -> Self {
        Self {
            inner: seeded_engine(),
            executed: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for CountingEngine {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn execute(&self, statement: &str) -> Result<QueryOutput> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(statement).await
    }
}

/// In-memory `app_metrics` with two apps across two platforms.
pub fn seeded_engine() -> SqliteEngine {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE app_metrics (
            app_name TEXT NOT NULL,
            platform TEXT NOT NULL,
            date TEXT NOT NULL,
            country TEXT NOT NULL,
            installs INTEGER NOT NULL,
            in_app_revenue REAL NOT NULL,
            ads_revenue REAL NOT NULL,
            ua_cost REAL NOT NULL
         );
         INSERT INTO app_metrics VALUES ('Paint', 'Android', '2025-01-01', 'US', 100, 10.5, 2.0, 5.0);
         INSERT INTO app_metrics VALUES ('Paint', 'iOS', '2025-01-01', 'US', 80, 12.0, 1.0, 4.0);
         INSERT INTO app_metrics VALUES ('Countdown', 'iOS', '2025-01-02', 'DE', 40, 3.0, 0.5, 1.0);
         INSERT INTO app_metrics VALUES ('Countdown', 'Android', '2025-01-02', 'GB', 25, 1.0, 0.25, 0.5);",
    )
    .unwrap();
    SqliteEngine::from_connection(conn).unwrap()
}

/// History store whose every call fails.
pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    async fn add_turn(&self, _turn: NewTurn) -> Result<Turn> {
        Err(ChatError::Persistence("disk full".into()))
    }

    async fn get_recent_turns(&self, _thread_id: &str, _limit: usize) -> Result<Vec<Turn>> {
        Err(ChatError::Persistence("disk full".into()))
    }

    async fn get_most_recent_statement(&self, _thread_id: &str) -> Result<Option<Turn>> {
        Err(ChatError::Persistence("disk full".into()))
    }

    async fn find_statement_by_keyword(
        &self,
        _thread_id: &str,
        _keyword: &str,
    ) -> Result<Option<Turn>> {
        Err(ChatError::Persistence("disk full".into()))
    }

    async fn get_turn_by_action_token(&self, _token: &str) -> Result<Option<Turn>> {
        Err(ChatError::Persistence("disk full".into()))
    }

    async fn cleanup_older_than(&self, _max_age: Duration) -> Result<u64> {
        Err(ChatError::Persistence("disk full".into()))
    }
}

/// Checkpoint store whose every call fails.
pub struct FailingCheckpoints;

#[async_trait]
impl CheckpointStore for FailingCheckpoints {
    async fn put(
        &self,
        _thread_id: &str,
        _checkpoint_id: &str,
        _parent_checkpoint_id: Option<&str>,
        _state_blob: &str,
        _metadata: &serde_json::Value,
    ) -> Result<()> {
        Err(ChatError::Persistence("read-only file system".into()))
    }

    async fn append(
        &self,
        _thread_id: &str,
        _checkpoint_id: &str,
        _state_blob: &str,
        _metadata: &serde_json::Value,
    ) -> Result<Option<String>> {
        Err(ChatError::Persistence("read-only file system".into()))
    }

    async fn get(&self, _thread_id: &str, _checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>> {
        Err(ChatError::Persistence("read-only file system".into()))
    }

    async fn list(&self, _thread_id: &str, _limit: usize) -> Result<Vec<Checkpoint>> {
        Err(ChatError::Persistence("read-only file system".into()))
    }

    async fn delete_by_thread(&self, _thread_id: &str) -> Result<u64> {
        Err(ChatError::Persistence("read-only file system".into()))
    }
}

pub fn settings(durability: CacheDurability) -> Settings {
    Settings {
        openai_api_key: "test-key".into(),
        cache_durability: durability,
        ..Settings::default()
    }
}

/// Stores opened on a shared state file so a second service sees the
/// first one's turns and checkpoints.
pub fn file_stores(path: &Path) -> (Arc<SqliteHistoryStore>, Arc<SqliteCheckpointStore>) {
    (
        Arc::new(SqliteHistoryStore::open(path).unwrap()),
        Arc::new(SqliteCheckpointStore::open(path).unwrap()),
    )
}

pub fn service(
    model: Arc<ScriptedModel>,
    engine: Arc<dyn QueryEngine>,
    state_db: &Path,
    durability: CacheDurability,
) -> ChatService {
    let (history, checkpoints) = file_stores(state_db);
    ChatService::new(settings(durability), model, engine, history, checkpoints)
}
