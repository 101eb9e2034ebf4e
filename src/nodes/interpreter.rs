//! Result interpretation: picks the response format and asks the model for
//! a short summary. Raw rows are rendered separately.

use crate::agent_prompts::INTERPRETER;
use crate::error::Result;
use crate::execution::result::{is_scalar, Record};
use crate::nodes::NodeContext;
use crate::state::{ResponseFormat, StateUpdate, WorkingState};
use tracing::{info, warn};

pub const NO_RESULTS_MESSAGE: &str = "The query returned no results. This might mean there's no \
data matching your criteria, or the filters might be too restrictive.";

pub const SAMPLE_ROWS: usize = 5;

/// `simple` for a single row of at most two scalar columns, else `table`.
pub fn choose_format(rows: &[Record], columns: &[String]) -> ResponseFormat {
    match rows {
        [only] if columns.len() <= 2 && only.values().all(is_scalar) => ResponseFormat::Simple,
        _ => ResponseFormat::Table,
    }
}

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    let rows = state.result_rows.as_deref().unwrap_or(&[]);
    if state.row_count == 0 || rows.is_empty() {
        info!("Empty result, skipping interpretation");
        return Ok(StateUpdate {
            response_format: Some(ResponseFormat::Simple),
            response_text: Some(NO_RESULTS_MESSAGE.to_string()),
            ..Default::default()
        });
    }

    let format = choose_format(rows, &state.column_names);
    let sample = serde_json::to_string(&rows.iter().take(SAMPLE_ROWS).collect::<Vec<_>>())?;
    let assumptions = if state.assumptions.is_empty() {
        "None".to_string()
    } else {
        state.assumptions.join("; ")
    };
    let row_count = state.row_count.to_string();
    let columns = state.column_names.join(", ");

    let prompt = INTERPRETER.render(&[
        ("query", state.effective_query()),
        ("assumptions", assumptions.as_str()),
        ("row_count", row_count.as_str()),
        ("columns", columns.as_str()),
        ("sample", sample.as_str()),
    ]);

    let text = match ctx.llm.invoke(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        Ok(_) => fallback_summary(state.row_count),
        Err(e) => {
            warn!(error = %e, "Interpretation failed, using row count summary");
            fallback_summary(state.row_count)
        }
    };

    info!(format = ?format, rows = state.row_count, "Result interpreted");
    Ok(StateUpdate {
        response_format: Some(format),
        response_text: Some(text),
        ..Default::default()
    })
}

fn fallback_summary(row_count: usize) -> String {
    match row_count {
        1 => "Here is the result.".to_string(),
        n => format!("The query returned {} rows.", n),
    }
}
