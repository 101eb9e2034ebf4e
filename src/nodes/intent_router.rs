//! Intent classification
//!
//! Export and show-query requests are recognised by keyword without a model
//! call. Everything else is classified by the model; an unusable reply
//! falls back to `analytics_query` at confidence 0.5.

use crate::agent_prompts::INTENT_CLASSIFIER;
use crate::error::Result;
use crate::llm::parse_json_reply;
use crate::nodes::{format_history_for_intent, NodeContext};
use crate::state::{Intent, StateUpdate, WorkingState};
use serde::Deserialize;
use tracing::{info, warn};

pub const EXPORT_KEYWORDS: [&str; 5] = ["export", "csv", "download", "save as", "get file"];

pub const SHOW_QUERY_KEYWORDS: [&str; 9] = [
    "show sql",
    "show me the sql",
    "what sql",
    "sql query",
    "sql statement",
    "what query",
    "see the query",
    "show query",
    "show the query",
];

pub const FAST_PATH_CONFIDENCE: f64 = 0.95;
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Deserialize)]
struct Classification {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Keyword classification; export wins over show-query.
pub fn fast_path(query: &str) -> Option<Intent> {
    let lower = query.to_lowercase();
    if EXPORT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some(Intent::Export);
    }
    if SHOW_QUERY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some(Intent::ShowQuery);
    }
    None
}

fn parse_classification(reply: &str) -> Option<(Intent, f64)> {
    let parsed: Classification = parse_json_reply(reply).ok()?;
    let intent = Intent::from_label(&parsed.intent)?;
    let confidence = parsed
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(FALLBACK_CONFIDENCE)
        .clamp(0.0, 1.0);
    Some((intent, confidence))
}

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    if let Some(intent) = fast_path(&state.user_query) {
        info!(%intent, "Intent matched by keyword");
        return Ok(classified(intent, FAST_PATH_CONFIDENCE));
    }

    let history = format_history_for_intent(&state.conversation_history);
    let prompt = INTENT_CLASSIFIER.render(&[
        ("history", history.as_str()),
        ("query", state.user_query.as_str()),
    ]);

    let (intent, confidence) = match ctx.llm.invoke(&prompt).await {
        Ok(reply) => parse_classification(&reply).unwrap_or_else(|| {
            warn!(reply = %reply, "Unparseable intent classification, defaulting");
            (Intent::AnalyticsQuery, FALLBACK_CONFIDENCE)
        }),
        Err(e) => {
            warn!(error = %e, "Intent classification failed, defaulting");
            (Intent::AnalyticsQuery, FALLBACK_CONFIDENCE)
        }
    };

    info!(%intent, confidence, "Intent classified");
    Ok(classified(intent, confidence))
}

fn classified(intent: Intent, confidence: f64) -> StateUpdate {
    StateUpdate {
        intent: Some(intent),
        confidence: Some(confidence),
        ..Default::default()
    }
}
