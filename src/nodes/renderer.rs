//! Response rendering for answered analytics questions.

use crate::error::Result;
use crate::nodes::HISTORY_REPLY_CHARS;
use crate::render::{assumptions_footnote, format_table, ActionElement, ActionKind, Block};
use crate::state::{ResponseFormat, StateUpdate, WorkingState};
use tracing::debug;
use uuid::Uuid;

pub fn run(state: &WorkingState) -> Result<StateUpdate> {
    let mut blocks = vec![Block::Text {
        text: state.response_text.clone(),
    }];

    let rows = state.result_rows.as_deref().unwrap_or(&[]);
    if state.response_format == ResponseFormat::Table && !rows.is_empty() {
        blocks.push(Block::Table {
            text: format_table(&state.column_names, rows),
        });
    }

    if let Some(note) = assumptions_footnote(&state.assumptions) {
        blocks.push(Block::Footnote { text: note });
    }

    // Actions only make sense when this turn produced a result.
    let action_token = match (&state.current_result_id, &state.result_rows) {
        (Some(_), Some(_)) => {
            let token = Uuid::new_v4().to_string();
            blocks.push(Block::Actions {
                elements: vec![
                    ActionElement::new(ActionKind::Export, &token),
                    ActionElement::new(ActionKind::ShowQuery, &token),
                ],
            });
            Some(token)
        }
        _ => None,
    };

    debug!(blocks = blocks.len(), has_actions = action_token.is_some(), "Response rendered");

    let history = state.history_with_reply(&state.response_text, HISTORY_REPLY_CHARS);
    Ok(StateUpdate {
        rendered_blocks: Some(Some(blocks)),
        action_token: Some(action_token),
        ..history
    })
}
