//! Execution stage: runs the validated statement and caches the result.
//!
//! Engine failures never escape this stage; they become a retryable
//! `statement_error` of the form `Execution failed: <detail>`.

use crate::cache::CacheEntry;
use crate::error::Result;
use crate::nodes::NodeContext;
use crate::state::{StateUpdate, WorkingState};
use chrono::Utc;
use tracing::{info, warn};

pub async fn run(state: &WorkingState, ctx: &NodeContext) -> Result<StateUpdate> {
    let statement = match state.generated_statement.as_deref() {
        Some(s) if state.statement_valid && !s.trim().is_empty() => s.trim(),
        _ => return Ok(failed("no validated statement to execute".to_string())),
    };

    match ctx.engine.execute(statement).await {
        Ok(output) => {
            let mut cache = state.result_cache.clone();
            let result_id = cache.key_for(statement);
            let row_count = output.row_count();
            let evicted = cache.insert(
                result_id.clone(),
                CacheEntry {
                    statement: statement.to_string(),
                    rows: output.rows.clone(),
                    columns: output.columns.clone(),
                    created_at: Utc::now(),
                    natural_query: state.effective_query().to_string(),
                    assumptions: state.assumptions.clone(),
                },
            );
            info!(
                engine = ctx.engine.name(),
                result_id = %result_id,
                row_count,
                cache_size = cache.len(),
                evicted = ?evicted,
                "Statement executed and cached"
            );
            Ok(StateUpdate {
                result_rows: Some(Some(output.rows)),
                row_count: Some(row_count),
                column_names: Some(output.columns),
                current_result_id: Some(Some(result_id)),
                result_cache: Some(cache),
                statement_error: Some(None),
                ..Default::default()
            })
        }
        Err(e) => {
            warn!(engine = ctx.engine.name(), error = %e, "Statement execution failed");
            Ok(failed(e.detail()))
        }
    }
}

fn failed(detail: String) -> StateUpdate {
    StateUpdate {
        result_rows: Some(None),
        row_count: Some(0),
        column_names: Some(Vec::new()),
        statement_error: Some(Some(format!("Execution failed: {}", detail))),
        ..Default::default()
    }
}
