//! Rendering - typed output blocks handed to the chat transport
//!
//! The pipeline produces a bounded list of [`Block`]s plus a plain-text
//! fallback. Transports translate blocks into their own markup; the limits
//! in [`limits`] are applied before anything leaves the pipeline.

pub mod limits;

use crate::execution::result::{display_value, Record};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_COLUMN_WIDTH: usize = 30;
pub const MAX_TABLE_ROWS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    /// Pre-formatted, code-fenced monospaced table.
    Table { text: String },
    Footnote { text: String },
    Actions { elements: Vec<ActionElement> },
}

impl Block {
    pub fn text(&self) -> Option<&str> {
        match self {
            Block::Text { text } | Block::Table { text } | Block::Footnote { text } => Some(text),
            Block::Actions { .. } => None,
        }
    }
}

/// Follow-up action offered under a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Export,
    ShowQuery,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Export => "Export CSV",
            ActionKind::ShowQuery => "Show SQL",
        }
    }

    /// Phrase fed to the pipeline when the action is clicked.
    pub fn canonical_query(&self) -> &'static str {
        match self {
            ActionKind::Export => "export csv",
            ActionKind::ShowQuery => "show sql",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Export => f.write_str("export"),
            ActionKind::ShowQuery => f.write_str("show_query"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "export" | "export_csv" => Ok(ActionKind::Export),
            "show_query" | "show-query" | "show_sql" => Ok(ActionKind::ShowQuery),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionElement {
    pub kind: ActionKind,
    pub label: String,
    /// Opaque id stored with the turn; resolves a click back to it.
    pub token: String,
}

impl ActionElement {
    pub fn new(kind: ActionKind, token: &str) -> Self {
        Self {
            kind,
            label: kind.label().to_string(),
            token: token.to_string(),
        }
    }
}

fn fit(value: &str, width: usize) -> String {
    let cut: String = value.chars().take(width).collect();
    format!("{:<width$}", cut, width = width)
}

/// Monospaced table wrapped in a code fence.
///
/// Column width is the widest of header and values, capped at
/// [`MAX_COLUMN_WIDTH`]; at most [`MAX_TABLE_ROWS`] rows are shown.
pub fn format_table(columns: &[String], rows: &[Record]) -> String {
    if columns.is_empty() || rows.is_empty() {
        return "No data to display.".to_string();
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .take(MAX_TABLE_ROWS)
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map(display_value).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let longest = cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(col.chars().count()))
                .max()
                .unwrap_or(0);
            longest.min(MAX_COLUMN_WIDTH)
        })
        .collect();

    let join_row = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| fit(v, *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(cells.len() + 3);
    lines.push(join_row(columns));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &cells {
        lines.push(join_row(row));
    }
    if rows.len() > MAX_TABLE_ROWS {
        lines.push(format!("+{} more rows", rows.len() - MAX_TABLE_ROWS));
    }

    format!("```\n{}\n```", lines.join("\n"))
}

/// Footnote listing the generator's assumptions, if any.
pub fn assumptions_footnote(assumptions: &[String]) -> Option<String> {
    let kept: Vec<&str> = assumptions
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(format!("_Assumptions: {}_", kept.join("; ")))
    }
}

/// Plain-text rendering of all text-bearing blocks.
pub fn fallback_text(blocks: &[Block]) -> String {
    let text = blocks
        .iter()
        .filter_map(Block::text)
        .collect::<Vec<_>>()
        .join("\n\n");
    limits::truncate_message_text(&text)
}
