//! Chat service
//!
//! Entry point for a chat transport. Owns the per-thread result caches and
//! wraps each pipeline run with history loading before and turn persistence
//! after. Persistence failures are logged and never fail a reply.

use crate::cache::{CacheEntry, CacheRegistry, ResultCache, CACHE_CAPACITY};
use crate::config::{CacheDurability, Settings};
use crate::db::{decode_state, CheckpointStore, HistoryStore, NewTurn, Turn};
use crate::error::Result;
use crate::execution::QueryEngine;
use crate::graph::{Pipeline, TurnInput};
use crate::llm::LanguageModel;
use crate::nodes::NodeContext;
use crate::render::{fallback_text, ActionKind, Block};
use crate::state::{CsvExport, HistoryEntry, Intent, ResponseFormat, WorkingState};
use crate::validation::validate_statement;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const APOLOGY_MESSAGE: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

pub const EXPIRED_ACTION_MESSAGE: &str =
    "That button has expired. Please ask the question again.";

/// What goes back to the chat transport.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub thread_id: String,
    /// Plain-text fallback for clients that cannot show blocks.
    pub text: String,
    pub blocks: Vec<Block>,
    pub format: ResponseFormat,
    pub intent: Option<Intent>,
    pub action_token: Option<String>,
    pub export: Option<CsvExport>,
}

impl ChatReply {
    fn plain(thread_id: &str, text: &str, format: ResponseFormat) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            text: text.to_string(),
            blocks: vec![Block::Text {
                text: text.to_string(),
            }],
            format,
            intent: None,
            action_token: None,
            export: None,
        }
    }

    fn from_state(state: WorkingState) -> Self {
        let blocks = state.rendered_blocks.unwrap_or_else(|| {
            vec![Block::Text {
                text: state.response_text.clone(),
            }]
        });
        let text = if state.response_text.is_empty() {
            fallback_text(&blocks)
        } else {
            state.response_text
        };
        Self {
            thread_id: state.thread_id,
            text,
            blocks,
            format: state.response_format,
            intent: state.intent,
            action_token: state.action_token,
            export: state.export,
        }
    }
}

pub struct ChatService {
    pipeline: Pipeline,
    caches: CacheRegistry,
    history: Arc<dyn HistoryStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: Settings,
}

impl ChatService {
    pub fn new(
        settings: Settings,
        llm: Arc<dyn LanguageModel>,
        engine: Arc<dyn QueryEngine>,
        history: Arc<dyn HistoryStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let ctx = NodeContext {
            llm,
            engine,
            history: Some(history.clone()),
        };
        let pipeline =
            Pipeline::new(ctx, settings.max_retries).with_checkpoints(checkpoints.clone());
        Self {
            pipeline,
            caches: CacheRegistry::new(),
            history,
            checkpoints,
            settings,
        }
    }

    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    /// Answer one user message in `thread_id`.
    pub async fn ask(&self, thread_id: &str, text: &str) -> Result<ChatReply> {
        info!(thread_id, "Incoming message");
        let conversation_history = self.load_history(thread_id).await;
        let result_cache = self.cache_for(thread_id).await;

        let input = TurnInput {
            user_query: text.to_string(),
            thread_id: thread_id.to_string(),
            conversation_history,
            result_cache,
            referenced_result_id: None,
        };

        let outcome = match self.pipeline.run(input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(thread_id, error = %e, "Pipeline failed");
                return Ok(ChatReply::plain(thread_id, APOLOGY_MESSAGE, ResponseFormat::Error));
            }
        };

        let state = outcome.state;
        self.caches.put(thread_id, state.result_cache.clone());
        self.record_turn(&state).await;
        Ok(ChatReply::from_state(state))
    }

    /// Handle a click on an export / show-query button.
    ///
    /// The token resolves to the turn that rendered the button; that turn's
    /// result is re-executed if the thread cache no longer holds it. Clicks
    /// are not recorded as turns.
    pub async fn handle_action(
        &self,
        thread_id: &str,
        kind: ActionKind,
        token: &str,
    ) -> Result<ChatReply> {
        info!(thread_id, action = %kind, "Action clicked");
        let turn = match self.history.get_turn_by_action_token(token).await {
            Ok(Some(turn)) if turn.thread_id == thread_id => turn,
            Ok(_) => {
                warn!(thread_id, "Unknown action token");
                return Ok(ChatReply::plain(
                    thread_id,
                    EXPIRED_ACTION_MESSAGE,
                    ResponseFormat::Simple,
                ));
            }
            Err(e) => {
                error!(thread_id, error = %e, "Action token lookup failed");
                return Ok(ChatReply::plain(thread_id, APOLOGY_MESSAGE, ResponseFormat::Error));
            }
        };

        let mut cache = self.cache_for(thread_id).await;
        let referenced_result_id = self.ensure_cached(&mut cache, &turn).await;

        let input = TurnInput {
            user_query: kind.canonical_query().to_string(),
            thread_id: thread_id.to_string(),
            conversation_history: self.load_history(thread_id).await,
            result_cache: cache,
            referenced_result_id,
        };

        match self.pipeline.run(input).await {
            Ok(outcome) => {
                self.caches
                    .put(thread_id, outcome.state.result_cache.clone());
                Ok(ChatReply::from_state(outcome.state))
            }
            Err(e) => {
                error!(thread_id, error = %e, "Pipeline failed on action");
                Ok(ChatReply::plain(thread_id, APOLOGY_MESSAGE, ResponseFormat::Error))
            }
        }
    }

    /// Latest checkpointed state of a thread.
    pub async fn resume(&self, thread_id: &str) -> Result<Option<WorkingState>> {
        match self.checkpoints.get(thread_id, None).await? {
            Some(checkpoint) => Ok(Some(decode_state(&checkpoint.state_blob)?)),
            None => Ok(None),
        }
    }

    pub async fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>> {
        self.history.get_recent_turns(thread_id, limit).await
    }

    /// Drop turns older than the configured retention window.
    pub async fn cleanup(&self) -> Result<u64> {
        let removed = self
            .history
            .cleanup_older_than(self.settings.history_retention)
            .await?;
        info!(removed, "History cleanup finished");
        Ok(removed)
    }

    /// Forget a thread's checkpoints and in-memory cache.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<u64> {
        self.caches.remove(thread_id);
        self.checkpoints.delete_by_thread(thread_id).await
    }

    async fn load_history(&self, thread_id: &str) -> Vec<HistoryEntry> {
        match self
            .history
            .get_recent_turns(thread_id, self.settings.history_limit)
            .await
        {
            Ok(turns) => turns
                .into_iter()
                .map(|t| HistoryEntry {
                    user: t.user_message,
                    bot: t.bot_response,
                })
                .collect(),
            Err(e) => {
                warn!(thread_id, error = %e, "Could not load history");
                Vec::new()
            }
        }
    }

    /// The thread's cache, rebuilt from durable state the first time this
    /// process sees the thread, whatever the message.
    async fn cache_for(&self, thread_id: &str) -> ResultCache {
        if let Some(cache) = self.caches.get(thread_id) {
            return cache;
        }
        self.rebuild_cache(thread_id).await
    }

    /// Restore a cold cache, from the latest checkpoint when configured,
    /// otherwise by replaying recent statements.
    async fn rebuild_cache(&self, thread_id: &str) -> ResultCache {
        if self.settings.cache_durability == CacheDurability::Checkpoint {
            match self.resume(thread_id).await {
                Ok(Some(state)) if !state.result_cache.is_empty() => {
                    info!(
                        thread_id,
                        entries = state.result_cache.len(),
                        "Cache restored from checkpoint"
                    );
                    return state.result_cache;
                }
                Ok(_) => {}
                Err(e) => warn!(thread_id, error = %e, "Checkpoint restore failed"),
            }
        }

        let turns = match self.history.get_recent_turns(thread_id, CACHE_CAPACITY).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(thread_id, error = %e, "Could not load turns for cache rebuild");
                return ResultCache::new();
            }
        };

        let mut cache = ResultCache::new();
        let replayable = turns
            .iter()
            .rev()
            .filter(|t| t.generated_statement.is_some())
            .unique_by(|t| t.generated_statement.clone())
            .collect::<Vec<_>>();
        for turn in replayable {
            self.ensure_cached(&mut cache, turn).await;
        }
        info!(thread_id, entries = cache.len(), "Cache rebuilt from history");
        cache
    }

    /// Make sure the turn's statement is cached, executing it if needed.
    /// Returns its result id.
    async fn ensure_cached(&self, cache: &mut ResultCache, turn: &Turn) -> Option<String> {
        let statement = turn.generated_statement.as_deref()?.trim();
        let result_id = cache.key_for(statement);
        if cache.contains(&result_id) {
            return Some(result_id);
        }

        if let Err(rejection) = validate_statement(statement) {
            warn!(thread_id = %turn.thread_id, reason = %rejection, "Stored statement rejected");
            return None;
        }

        let engine = &self.pipeline.context().engine;
        match engine.execute(statement).await {
            Ok(output) => {
                cache.insert(
                    result_id.clone(),
                    CacheEntry {
                        statement: statement.to_string(),
                        rows: output.rows,
                        columns: output.columns,
                        created_at: turn.created_at,
                        natural_query: turn.user_message.clone(),
                        assumptions: Vec::new(),
                    },
                );
                cache.contains(&result_id).then_some(result_id)
            }
            Err(e) => {
                warn!(thread_id = %turn.thread_id, error = %e, "Replaying stored statement failed");
                None
            }
        }
    }

    async fn record_turn(&self, state: &WorkingState) {
        // Only statements that ran this turn are worth finding again.
        let generated_statement = state
            .current_result_id
            .as_ref()
            .and(state.generated_statement.clone());
        let turn = NewTurn {
            thread_id: state.thread_id.clone(),
            user_message: state.user_query.clone(),
            bot_response: state.response_text.clone(),
            intent: state.intent,
            generated_statement,
            action_token: state.action_token.clone(),
        };
        if let Err(e) = self.history.add_turn(turn).await {
            warn!(thread_id = %state.thread_id, error = %e, "Failed to record turn");
        }
    }
}
