//! Show the SQL behind an earlier answer.

use crate::cache::{CacheEntry, ResultCache};
use crate::error::Result;
use crate::nodes::{NodeContext, HISTORY_REPLY_CHARS};
use crate::render::Block;
use crate::state::{ResponseFormat, StateUpdate, WorkingState};
use crate::text::truncate_with_ellipsis;
use tracing::{debug, info, warn};

pub const NOTHING_TO_SHOW_MESSAGE: &str = "No SQL queries in history. Please ask a question first!";

/// Words shorter than this never count as a keyword match.
const MIN_KEYWORD_LEN: usize = 4;

/// A statement and the question it answered.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundStatement {
    pub statement: String,
    pub natural_query: String,
}

impl From<&CacheEntry> for FoundStatement {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            statement: entry.statement.clone(),
            natural_query: entry.natural_query.clone(),
        }
    }
}

fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Position requested by an ordinal word, oldest first. `last` and
/// `previous` pick the newest entry.
fn ordinal(query: &str) -> Option<Ordinal> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .collect();
    let has = |w: &str| words.iter().any(|x| x == w);
    if has("first") {
        Some(Ordinal::FromOldest(0))
    } else if has("second") {
        Some(Ordinal::FromOldest(1))
    } else if has("third") {
        Some(Ordinal::FromOldest(2))
    } else if has("last") || has("previous") {
        Some(Ordinal::Newest)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ordinal {
    FromOldest(usize),
    Newest,
}

/// Find the cached statement the user is asking about.
pub fn find_in_cache(
    cache: &ResultCache,
    referenced: Option<&str>,
    user_query: &str,
) -> Option<FoundStatement> {
    if let Some(entry) = referenced.and_then(|id| cache.get(id)) {
        debug!("Show query matched referenced result");
        return Some(entry.into());
    }

    let newest = cache.newest_first();
    if newest.is_empty() {
        return None;
    }

    match ordinal(user_query) {
        Some(Ordinal::Newest) => return newest.first().map(|(_, e)| (*e).into()),
        Some(Ordinal::FromOldest(i)) => {
            if let Some((_, entry)) = newest.iter().rev().nth(i) {
                return Some((*entry).into());
            }
        }
        None => {}
    }

    let wanted = keywords(user_query);
    let by_keyword = newest.iter().find(|(_, entry)| {
        let question = entry.natural_query.to_lowercase();
        wanted.iter().any(|w| question.contains(w.as_str()))
    });
    if let Some((_, entry)) = by_keyword {
        return Some((*entry).into());
    }

    newest.first().map(|(_, e)| (*e).into())
}

/// Cold-cache fallback through the durable turn log.
async fn find_in_history(state: &WorkingState, ctx: &NodeContext) -> Option<FoundStatement> {
    let store = ctx.history.as_ref()?;
    let thread = state.thread_id.as_str();

    let mut found = None;
    for word in keywords(&state.user_query) {
        match store.find_statement_by_keyword(thread, &word).await {
            Ok(Some(turn)) => {
                found = Some(turn);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(thread_id = thread, error = %e, "Keyword lookup in history failed");
                break;
            }
        }
    }
    if found.is_none() {
        found = match store.get_most_recent_statement(thread).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(thread_id = thread, error = %e, "History lookup failed");
                None
            }
        };
    }

    found.and_then(|turn| {
        turn.generated_statement.map(|statement| FoundStatement {
            statement,
            natural_query: turn.user_message,
        })
    })
}

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    let found = match find_in_cache(
        &state.result_cache,
        state.referenced_result_id.as_deref(),
        &state.user_query,
    ) {
        Some(found) => Some(found),
        None => find_in_history(state, ctx).await,
    };

    let blocks = match &found {
        Some(found) => {
            info!(thread_id = %state.thread_id, "Showing stored statement");
            vec![
                Block::Text {
                    text: format!(
                        "*SQL Query*\n_For: \"{}\"_",
                        truncate_with_ellipsis(&found.natural_query, 50)
                    ),
                },
                Block::Text {
                    text: format!("```sql\n{}\n```", found.statement),
                },
            ]
        }
        None => vec![Block::Text {
            text: NOTHING_TO_SHOW_MESSAGE.to_string(),
        }],
    };

    let text = blocks
        .iter()
        .filter_map(Block::text)
        .collect::<Vec<_>>()
        .join("\n\n");
    let history = state.history_with_reply(&text, HISTORY_REPLY_CHARS);
    Ok(StateUpdate {
        response_format: Some(ResponseFormat::Simple),
        response_text: Some(text),
        rendered_blocks: Some(Some(blocks)),
        action_token: Some(None),
        ..history
    })
}
