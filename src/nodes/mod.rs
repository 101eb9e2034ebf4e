//! Pipeline stages
//!
//! Every stage reads the accumulated [`WorkingState`] and returns a
//! [`StateUpdate`]; none of them mutates state directly. Stages that call the
//! language model recover from its failures locally, so a stage only returns
//! `Err` for faults outside the model call.

pub mod context_resolver;
pub mod decline;
pub mod error_handler;
pub mod executor;
pub mod export;
pub mod generator;
pub mod intent_router;
pub mod interpreter;
pub mod renderer;
pub mod show_query;
pub mod validator;

use crate::db::HistoryStore;
use crate::execution::QueryEngine;
use crate::llm::LanguageModel;
use crate::state::HistoryEntry;
use crate::text::truncate_chars;
use std::sync::Arc;

/// Turns of history included in prompts.
pub const PROMPT_HISTORY_TURNS: usize = 5;

/// Characters of each bot reply kept in the conversation history.
pub const HISTORY_REPLY_CHARS: usize = 500;

/// Collaborators shared by all stages.
#[derive(Clone)]
pub struct NodeContext {
    pub llm: Arc<dyn LanguageModel>,
    pub engine: Arc<dyn QueryEngine>,
    /// Fallback for show-query when the in-memory cache is cold.
    pub history: Option<Arc<dyn HistoryStore>>,
}

fn last_turns(history: &[HistoryEntry]) -> &[HistoryEntry] {
    let start = history.len().saturating_sub(PROMPT_HISTORY_TURNS);
    &history[start..]
}

/// History block for the intent classifier.
pub fn format_history_for_intent(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "No previous conversation".to_string();
    }
    last_turns(history)
        .iter()
        .map(|h| format!("User: {}\nBot: {}", h.user, truncate_chars(&h.bot, 200)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// History block for the context resolver, numbered per turn.
pub fn format_history_for_resolver(history: &[HistoryEntry]) -> String {
    last_turns(history)
        .iter()
        .enumerate()
        .map(|(i, h)| {
            format!(
                "[Query {}] User: {}\nBot: {}",
                i + 1,
                h.user,
                truncate_chars(&h.bot, 300)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::agent_prompts::{PromptKind, RenderedPrompt};
    use crate::error::{ChatError, Result};
    use crate::execution::{QueryEngine, QueryOutput, SqliteEngine};
    use crate::llm::LanguageModel;
    use crate::nodes::NodeContext;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Replies queued per prompt kind; records every prompt it sees.
    #[derive(Default)]
    pub struct StubModel {
        replies: Mutex<HashMap<PromptKind, VecDeque<Result<String>>>>,
        pub calls: Mutex<Vec<RenderedPrompt>>,
    }

    impl StubModel {
        pub fn reply(self, kind: PromptKind, text: &str) -> Self {
            self.push(kind, Ok(text.to_string()));
            self
        }

        pub fn fail(self, kind: PromptKind) -> Self {
            self.push(kind, Err(ChatError::Llm("gateway down".into())));
            self
        }

        fn push(&self, kind: PromptKind, reply: Result<String>) {
            self.replies
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .push_back(reply);
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String> {
            self.calls.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .get_mut(&prompt.kind)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(ChatError::Llm(format!("no reply queued for {:?}", prompt.kind))))
        }
    }

    /// Engine that refuses every statement.
    pub struct BrokenEngine;

    #[async_trait]
    impl QueryEngine for BrokenEngine {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn execute(&self, _statement: &str) -> Result<QueryOutput> {
            Err(ChatError::Execution("relation \"app_metrics\" does not exist".into()))
        }
    }

    pub fn metrics_engine() -> SqliteEngine {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE app_metrics (
                app_name TEXT, platform TEXT, date TEXT, country TEXT,
                installs INTEGER, in_app_revenue REAL, ads_revenue REAL, ua_cost REAL
             );
             INSERT INTO app_metrics VALUES ('Paint', 'Android', '2025-01-01', 'US', 100, 10.5, 2.0, 5.0);
             INSERT INTO app_metrics VALUES ('Paint', 'iOS', '2025-01-01', 'US', 80, 12.0, 1.0, 4.0);
             INSERT INTO app_metrics VALUES ('Countdown', 'iOS', '2025-01-02', 'DE', 40, 3.0, 0.5, 1.0);",
        )
        .unwrap();
        SqliteEngine::from_connection(conn).unwrap()
    }

    pub fn context(model: StubModel) -> (NodeContext, Arc<StubModel>) {
        context_with_engine(model, Arc::new(metrics_engine()))
    }

    pub fn context_with_engine(
        model: StubModel,
        engine: Arc<dyn QueryEngine>,
    ) -> (NodeContext, Arc<StubModel>) {
        let model = Arc::new(model);
        let ctx = NodeContext {
            llm: model.clone(),
            engine,
            history: None,
        };
        (ctx, model)
    }
}
