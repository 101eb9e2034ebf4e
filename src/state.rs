//! Working state for one conversational turn
//!
//! A `WorkingState` is created when a turn starts and threaded through the
//! pipeline. Stages never mutate it: each returns a `StateUpdate` holding only
//! the fields it touched, and the driver folds that into a new state with
//! [`WorkingState::apply`].

use crate::cache::ResultCache;
use crate::execution::result::Record;
use crate::render::Block;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user wants from this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AnalyticsQuery,
    FollowUp,
    #[serde(alias = "export_csv")]
    Export,
    #[serde(alias = "show_sql")]
    ShowQuery,
    OffTopic,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AnalyticsQuery => "analytics_query",
            Intent::FollowUp => "follow_up",
            Intent::Export => "export",
            Intent::ShowQuery => "show_query",
            Intent::OffTopic => "off_topic",
        }
    }

    /// Parse a classifier label, accepting the legacy `export_csv` / `show_sql` names.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "analytics_query" => Some(Intent::AnalyticsQuery),
            "follow_up" => Some(Intent::FollowUp),
            "export" | "export_csv" => Some(Intent::Export),
            "show_query" | "show_sql" => Some(Intent::ShowQuery),
            "off_topic" => Some(Intent::OffTopic),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Simple,
    Table,
    Error,
}

/// One prior exchange, as fed to prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user: String,
    pub bot: String,
}

/// Typed transcript message. Serialized with a `type` discriminator so a
/// checkpoint blob restores the right variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Human { content: String },
    Ai { content: String },
    System { content: String },
}

/// CSV payload produced by the export stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvExport {
    pub content: String,
    pub filename: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingState {
    pub user_query: String,
    pub thread_id: String,

    /// Prior exchanges, most recent last.
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,

    #[serde(default)]
    pub messages: Vec<Message>,

    pub intent: Option<Intent>,
    #[serde(default)]
    pub confidence: f64,

    pub resolved_query: Option<String>,
    pub referenced_result_id: Option<String>,

    pub generated_statement: Option<String>,
    pub statement_error: Option<String>,
    #[serde(default)]
    pub statement_valid: bool,
    /// Generator invocations this turn. Never decreases.
    #[serde(default)]
    pub retry_count: u32,

    pub result_rows: Option<Vec<Record>>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub column_names: Vec<String>,

    /// Fingerprint of the statement executed this turn; only set on success.
    pub current_result_id: Option<String>,
    #[serde(default)]
    pub result_cache: ResultCache,

    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub response_text: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub rendered_blocks: Option<Vec<Block>>,
    pub action_token: Option<String>,

    pub export: Option<CsvExport>,
}

/// Partial update returned by a stage. `None` leaves a field untouched;
/// for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub conversation_history: Option<Vec<HistoryEntry>>,
    pub messages: Option<Vec<Message>>,
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub resolved_query: Option<Option<String>>,
    pub referenced_result_id: Option<Option<String>>,
    pub generated_statement: Option<Option<String>>,
    pub statement_error: Option<Option<String>>,
    pub statement_valid: Option<bool>,
    pub retry_count: Option<u32>,
    pub result_rows: Option<Option<Vec<Record>>>,
    pub row_count: Option<usize>,
    pub column_names: Option<Vec<String>>,
    pub current_result_id: Option<Option<String>>,
    pub result_cache: Option<ResultCache>,
    pub response_format: Option<ResponseFormat>,
    pub response_text: Option<String>,
    pub assumptions: Option<Vec<String>>,
    pub rendered_blocks: Option<Option<Vec<Block>>>,
    pub action_token: Option<Option<String>>,
    pub export: Option<Option<CsvExport>>,
}

impl WorkingState {
    pub fn new(user_query: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }

    /// The query the generator should answer: the resolved rewrite when
    /// there is one, otherwise the raw user text.
    pub fn effective_query(&self) -> &str {
        self.resolved_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.user_query)
    }

    /// Fold a stage's update into a new state.
    pub fn apply(mut self, update: StateUpdate) -> Self {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }

        set(&mut self.conversation_history, update.conversation_history);
        set(&mut self.messages, update.messages);
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(confidence) = update.confidence {
            self.confidence = confidence.clamp(0.0, 1.0);
        }
        set(&mut self.resolved_query, update.resolved_query);
        set(&mut self.referenced_result_id, update.referenced_result_id);
        set(&mut self.generated_statement, update.generated_statement);
        set(&mut self.statement_error, update.statement_error);
        set(&mut self.statement_valid, update.statement_valid);
        if let Some(count) = update.retry_count {
            self.retry_count = self.retry_count.max(count);
        }
        set(&mut self.result_rows, update.result_rows);
        set(&mut self.row_count, update.row_count);
        set(&mut self.column_names, update.column_names);
        set(&mut self.current_result_id, update.current_result_id);
        set(&mut self.result_cache, update.result_cache);
        set(&mut self.response_format, update.response_format);
        set(&mut self.response_text, update.response_text);
        set(&mut self.assumptions, update.assumptions);
        set(&mut self.rendered_blocks, update.rendered_blocks);
        set(&mut self.action_token, update.action_token);
        set(&mut self.export, update.export);
        self
    }

    /// History and transcript with this turn's exchange appended. The bot
    /// side of the history entry is capped at `max_bot_chars`.
    pub fn history_with_reply(&self, reply: &str, max_bot_chars: usize) -> StateUpdate {
        let mut history = self.conversation_history.clone();
        history.push(HistoryEntry {
            user: self.user_query.clone(),
            bot: crate::text::truncate_chars(reply, max_bot_chars).to_string(),
        });
        let mut messages = self.messages.clone();
        messages.push(Message::Human {
            content: self.user_query.clone(),
        });
        messages.push(Message::Ai {
            content: reply.to_string(),
        });
        StateUpdate {
            conversation_history: Some(history),
            messages: Some(messages),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_sets_and_clears() {
        let state = WorkingState::new("q", "t").apply(StateUpdate {
            generated_statement: Some(Some("SELECT 1".into())),
            statement_error: Some(Some("boom".into())),
            ..Default::default()
        });
        assert_eq!(state.generated_statement.as_deref(), Some("SELECT 1"));

        let state = state.apply(StateUpdate {
            statement_error: Some(None),
            ..Default::default()
        });
        assert!(state.statement_error.is_none());
        assert_eq!(state.generated_statement.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_retry_count_never_decreases() {
        let state = WorkingState::new("q", "t").apply(StateUpdate {
            retry_count: Some(2),
            ..Default::default()
        });
        let state = state.apply(StateUpdate {
            retry_count: Some(1),
            ..Default::default()
        });
        assert_eq!(state.retry_count, 2);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let state = WorkingState::new("q", "t").apply(StateUpdate {
            confidence: Some(1.7),
            ..Default::default()
        });
        assert_eq!(state.confidence, 1.0);
    }

    #[test]
    fn test_effective_query_prefers_resolved() {
        let mut state = WorkingState::new("what about iOS?", "t");
        assert_eq!(state.effective_query(), "what about iOS?");
        state.resolved_query = Some("How many iOS apps do we have?".into());
        assert_eq!(state.effective_query(), "How many iOS apps do we have?");
    }

    #[test]
    fn test_intent_labels() {
        assert_eq!(Intent::from_label("export_csv"), Some(Intent::Export));
        assert_eq!(Intent::from_label("SHOW_SQL"), Some(Intent::ShowQuery));
        assert_eq!(Intent::from_label("weather"), None);
        let parsed: Intent = serde_json::from_str("\"show_sql\"").unwrap();
        assert_eq!(parsed, Intent::ShowQuery);
    }

    #[test]
    fn test_messages_round_trip_with_type_tag() {
        let msgs = vec![
            Message::Human { content: "hi".into() },
            Message::Ai { content: "hello".into() },
        ];
        let json = serde_json::to_value(&msgs).unwrap();
        assert_eq!(json[0]["type"], "human");
        assert_eq!(json[1]["type"], "ai");
        let back: Vec<Message> = serde_json::from_value(json).unwrap();
        assert_eq!(back, msgs);
    }

    #[test]
    fn test_history_with_reply_caps_bot_text() {
        let state = WorkingState::new("q", "t");
        let long = "x".repeat(800);
        let update = state.history_with_reply(&long, 500);
        let history = update.conversation_history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].bot.chars().count(), 500);
        assert_eq!(update.messages.unwrap().len(), 2);
    }
}
