//! CSV export of a cached result.

use crate::cache::{CacheEntry, ResultCache};
use crate::error::{ChatError, Result};
use crate::execution::result::display_value;
use crate::nodes::HISTORY_REPLY_CHARS;
use crate::render::Block;
use crate::state::{CsvExport, ResponseFormat, StateUpdate, WorkingState};
use crate::text::truncate_with_ellipsis;
use chrono::Utc;
use tracing::info;

pub const EMPTY_CACHE_MESSAGE: &str =
    "No recent query results to export. Please ask a question first!";
pub const NO_DATA_MESSAGE: &str = "The query returned no data to export.";

/// The referenced entry when it is still cached, else the newest one.
pub fn select_entry<'a>(
    cache: &'a ResultCache,
    referenced: Option<&str>,
) -> Option<(&'a str, &'a CacheEntry)> {
    referenced
        .and_then(|id| cache.entry(id))
        .or_else(|| cache.most_recent())
}

/// Serialize an entry's rows as CSV, header in cached column order.
pub fn to_csv(entry: &CacheEntry) -> Result<String> {
    let columns: Vec<String> = if entry.columns.is_empty() {
        entry
            .rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        entry.columns.clone()
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| ChatError::Export(e.to_string()))?;
    for row in &entry.rows {
        let fields: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(display_value).unwrap_or_default())
            .collect();
        writer
            .write_record(&fields)
            .map_err(|e| ChatError::Export(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ChatError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ChatError::Export(e.to_string()))
}

fn reply(state: &WorkingState, text: &str, export: Option<CsvExport>) -> StateUpdate {
    let history = state.history_with_reply(text, HISTORY_REPLY_CHARS);
    StateUpdate {
        response_format: Some(ResponseFormat::Simple),
        response_text: Some(text.to_string()),
        rendered_blocks: Some(Some(vec![Block::Text {
            text: text.to_string(),
        }])),
        action_token: Some(None),
        export: Some(export),
        ..history
    }
}

pub fn run(state: &WorkingState) -> Result<StateUpdate> {
    let Some((result_id, entry)) =
        select_entry(&state.result_cache, state.referenced_result_id.as_deref())
    else {
        info!("Export requested with empty cache");
        return Ok(reply(state, EMPTY_CACHE_MESSAGE, None));
    };

    if entry.rows.is_empty() {
        return Ok(reply(state, NO_DATA_MESSAGE, None));
    }

    let content = to_csv(entry)?;
    let filename = format!("export_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
    let text = format!(
        "*CSV Export Complete*\n_{} rows exported from:_ \"{}\"",
        entry.rows.len(),
        truncate_with_ellipsis(&entry.natural_query, 50)
    );
    info!(result_id, rows = entry.rows.len(), filename = %filename, "CSV export prepared");

    let export = CsvExport {
        content,
        filename,
        title: entry.natural_query.clone(),
    };
    Ok(reply(state, &text, Some(export)))
}
