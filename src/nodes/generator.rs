//! Statement generation
//!
//! The only stage the retry edges loop back to. The first attempt uses the
//! schema + examples prompt; later attempts use the repair prompt with the
//! failing statement and its error. Every invocation bumps `retry_count`.

use crate::agent_prompts::{DB_SCHEMA, FEW_SHOT_EXAMPLES, STATEMENT_GENERATOR, STATEMENT_REPAIR};
use crate::error::Result;
use crate::llm::strip_code_fences;
use crate::nodes::NodeContext;
use crate::state::{StateUpdate, WorkingState};
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

lazy_static::lazy_static! {
    static ref SELECT_FRAGMENT: Option<Regex> = Regex::new(r"(?is)\bselect\b[^;]*;?").ok();
}

/// Statement and assumptions extracted from a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub statement: String,
    pub assumptions: Vec<String>,
}

fn assumptions_from(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("none") => {
            vec![s.trim().to_string()]
        }
        _ => Vec::new(),
    }
}

/// Parse `{"statement": ..., "assumptions": [...]}` (`sql` is accepted for
/// the statement key). Falls back to the first `SELECT ...` fragment, up to
/// and including a terminating `;`.
pub fn parse_generation(reply: &str) -> Option<Generated> {
    let body = strip_code_fences(reply);

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        let statement = obj
            .get("statement")
            .or_else(|| obj.get("sql"))
            .and_then(Value::as_str)
            .map(|s| strip_code_fences(s).to_string())
            .filter(|s| !s.is_empty());
        if let Some(statement) = statement {
            return Some(Generated {
                statement,
                assumptions: assumptions_from(obj.get("assumptions")),
            });
        }
    }

    let fragment = SELECT_FRAGMENT.as_ref().and_then(|re| re.find(body))?;
    Some(Generated {
        statement: fragment.as_str().trim().to_string(),
        assumptions: Vec::new(),
    })
}

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    let query = state.effective_query();
    let attempt = state.retry_count + 1;
    let previous_statement = state.generated_statement.as_deref().unwrap_or("");
    let previous_error = state.statement_error.as_deref().unwrap_or("");
    let repairing = state.retry_count > 0
        && (!previous_statement.is_empty() || !previous_error.is_empty());

    let prompt = if repairing {
        STATEMENT_REPAIR.render(&[
            ("schema", DB_SCHEMA),
            ("query", query),
            ("previous_statement", previous_statement),
            ("error", previous_error),
        ])
    } else {
        STATEMENT_GENERATOR.render(&[
            ("schema", DB_SCHEMA),
            ("examples", FEW_SHOT_EXAMPLES),
            ("query", query),
        ])
    };

    info!(attempt, repairing, "Generating statement");

    let outcome = match ctx.llm.invoke(&prompt).await {
        Ok(reply) => parse_generation(&reply).ok_or_else(|| {
            "could not find a SQL statement in the model response".to_string()
        }),
        Err(e) => Err(e.detail()),
    };

    let update = match outcome {
        Ok(generated) => {
            info!(attempt, statement = %generated.statement, "Statement generated");
            StateUpdate {
                generated_statement: Some(Some(generated.statement)),
                assumptions: Some(generated.assumptions),
                statement_error: Some(None),
                statement_valid: Some(false),
                retry_count: Some(attempt),
                ..Default::default()
            }
        }
        Err(reason) => {
            warn!(attempt, reason = %reason, "Statement generation failed");
            StateUpdate {
                generated_statement: Some(None),
                assumptions: Some(Vec::new()),
                statement_error: Some(Some(format!("Generation failed: {}", reason))),
                statement_valid: Some(false),
                retry_count: Some(attempt),
                ..Default::default()
            }
        }
    };
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_prompts::PromptKind;
    use crate::nodes::test_support::{context, StubModel};

    #[test]
    fn test_parse_json_reply() {
        let g = parse_generation(
            r#"{"statement": "SELECT COUNT(*) FROM app_metrics", "assumptions": ["All dates"]}"#,
        )
        .unwrap();
        assert_eq!(g.statement, "SELECT COUNT(*) FROM app_metrics");
        assert_eq!(g.assumptions, vec!["All dates"]);
    }

    #[test]
    fn test_parse_accepts_sql_key_and_fences() {
        let g = parse_generation("```json\n{\"sql\": \"SELECT 1;\", \"assumptions\": \"None\"}\n```").unwrap();
        assert_eq!(g.statement, "SELECT 1;");
        assert!(g.assumptions.is_empty());
    }

    #[test]
    fn test_fallback_extracts_first_select() {
        let g = parse_generation("Here you go:\nselect app_name from app_metrics; -- done\nSELECT 2;").unwrap();
        assert_eq!(g.statement, "select app_name from app_metrics;");

        let g = parse_generation("Try SELECT SUM(installs) FROM app_metrics").unwrap();
        assert_eq!(g.statement, "SELECT SUM(installs) FROM app_metrics");
    }

    #[test]
    fn test_no_statement_found() {
        assert!(parse_generation("Sorry, I cannot help with that.").is_none());
    }

    #[tokio::test]
    async fn test_first_attempt_uses_generation_prompt() {
        let model = StubModel::default().reply(
            PromptKind::StatementGeneration,
            r#"{"statement": "SELECT COUNT(DISTINCT app_name) AS app_count FROM app_metrics", "assumptions": []}"#,
        );
        let (ctx, model) = context(model);
        let update = run(&WorkingState::new("How many apps do we have?", "t"), &ctx)
            .await
            .unwrap();
        assert_eq!(update.retry_count, Some(1));
        assert_eq!(update.statement_error, Some(None));
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].kind, PromptKind::StatementGeneration);
        assert!(calls[0].system.contains("app_metrics"));
    }

    #[tokio::test]
    async fn test_retry_uses_repair_prompt_with_error() {
        let model = StubModel::default().reply(PromptKind::StatementRepair, r#"{"statement": "SELECT 1"}"#);
        let (ctx, model) = context(model);
        let mut state = WorkingState::new("How many apps?", "t");
        state.retry_count = 1;
        state.generated_statement = Some("SELECT * FROM apps".into());
        state.statement_error = Some("Execution failed: no such table: apps".into());

        let update = run(&state, &ctx).await.unwrap();
        assert_eq!(update.retry_count, Some(2));
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].kind, PromptKind::StatementRepair);
        assert!(calls[0].user.contains("SELECT * FROM apps"));
        assert!(calls[0].user.contains("no such table: apps"));
    }

    #[tokio::test]
    async fn test_unusable_reply_sets_generation_error() {
        let model = StubModel::default().reply(PromptKind::StatementGeneration, "I don't know");
        let (ctx, _) = context(model);
        let update = run(&WorkingState::new("How many apps?", "t"), &ctx).await.unwrap();
        assert_eq!(update.generated_statement, Some(None));
        let err = update.statement_error.unwrap().unwrap();
        assert!(err.starts_with("Generation failed"));
        assert_eq!(update.retry_count, Some(1));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_retryable() {
        let (ctx, _) = context(StubModel::default().fail(PromptKind::StatementGeneration));
        let update = run(&WorkingState::new("How many apps?", "t"), &ctx).await.unwrap();
        assert!(update.statement_error.unwrap().unwrap().contains("gateway down"));
    }
}
