//! Context resolution for follow-up questions

use crate::agent_prompts::CONTEXT_RESOLVER;
use crate::error::Result;
use crate::llm::strip_code_fences;
use crate::nodes::{format_history_for_resolver, NodeContext};
use crate::state::{StateUpdate, WorkingState};
use tracing::{debug, info, warn};

/// Result the current turn builds on: this turn's result if one exists,
/// otherwise the newest cached one.
fn prior_result_id(state: &WorkingState) -> Option<String> {
    state
        .current_result_id
        .clone()
        .or_else(|| state.result_cache.most_recent().map(|(id, _)| id.to_string()))
}

fn clean_rewrite(reply: &str) -> String {
    let text = strip_code_fences(reply);
    let text = text
        .strip_prefix("Resolved question:")
        .unwrap_or(text)
        .trim();
    text.trim_matches('"').trim().to_string()
}

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    if state.conversation_history.is_empty() {
        debug!("No history, query is already standalone");
        return Ok(StateUpdate {
            resolved_query: Some(Some(state.user_query.clone())),
            referenced_result_id: Some(None),
            ..Default::default()
        });
    }

    let history = format_history_for_resolver(&state.conversation_history);
    let prompt = CONTEXT_RESOLVER.render(&[
        ("history", history.as_str()),
        ("query", state.user_query.as_str()),
    ]);

    let resolved = match ctx.llm.invoke(&prompt).await {
        Ok(reply) => {
            let rewrite = clean_rewrite(&reply);
            if rewrite.is_empty() {
                state.user_query.clone()
            } else {
                rewrite
            }
        }
        Err(e) => {
            warn!(error = %e, "Context resolution failed, using original query");
            state.user_query.clone()
        }
    };

    let context_used = resolved.to_lowercase() != state.user_query.to_lowercase();
    let referenced = if context_used {
        prior_result_id(state)
    } else {
        None
    };

    info!(
        context_used,
        resolved = %resolved,
        referenced_result_id = ?referenced,
        "Query resolved"
    );

    Ok(StateUpdate {
        resolved_query: Some(Some(resolved)),
        referenced_result_id: Some(referenced),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_prompts::PromptKind;
    use crate::cache::{CacheEntry, ResultCache};
    use crate::nodes::test_support::{context, StubModel};
    use crate::state::HistoryEntry;
    use chrono::Utc;

    fn with_history(query: &str) -> WorkingState {
        let mut cache = ResultCache::new();
        cache.insert(
            "abcd1234".into(),
            CacheEntry {
                statement: "SELECT COUNT(DISTINCT app_name) FROM app_metrics WHERE platform = 'Android'".into(),
                rows: Vec::new(),
                columns: Vec::new(),
                created_at: Utc::now(),
                natural_query: "How many Android apps do we have?".into(),
                assumptions: Vec::new(),
            },
        );
        let mut state = WorkingState::new(query, "t");
        state.conversation_history = vec![HistoryEntry {
            user: "How many Android apps do we have?".into(),
            bot: "We have 15 Android apps".into(),
        }];
        state.result_cache = cache;
        state
    }

    #[tokio::test]
    async fn test_empty_history_skips_model() {
        let (ctx, model) = context(StubModel::default());
        let update = run(&WorkingState::new("How many apps do we have?", "t"), &ctx)
            .await
            .unwrap();
        assert_eq!(
            update.resolved_query,
            Some(Some("How many apps do we have?".to_string()))
        );
        assert_eq!(update.referenced_result_id, Some(None));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_follow_up_is_rewritten_and_references_prior_result() {
        let model = StubModel::default().reply(
            PromptKind::ContextResolution,
            "\"How many iOS apps do we have?\"",
        );
        let (ctx, model) = context(model);
        let update = run(&with_history("What about iOS?"), &ctx).await.unwrap();

        let resolved = update.resolved_query.unwrap().unwrap();
        assert_eq!(resolved, "How many iOS apps do we have?");
        assert_ne!(resolved, "What about iOS?");
        assert_eq!(update.referenced_result_id, Some(Some("abcd1234".to_string())));
        let calls = model.calls.lock().unwrap();
        assert!(calls[0].user.contains("[Query 1] User: How many Android apps"));
    }

    #[tokio::test]
    async fn test_unchanged_rewrite_has_no_reference() {
        let model = StubModel::default().reply(PromptKind::ContextResolution, "which country earns the most?");
        let (ctx, _) = context(model);
        let update = run(&with_history("Which country earns the most?"), &ctx).await.unwrap();
        assert_eq!(update.referenced_result_id, Some(None));
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_original() {
        let (ctx, _) = context(StubModel::default().fail(PromptKind::ContextResolution));
        let update = run(&with_history("and the least?"), &ctx).await.unwrap();
        assert_eq!(update.resolved_query, Some(Some("and the least?".to_string())));
        assert_eq!(update.referenced_result_id, Some(None));
    }
}
