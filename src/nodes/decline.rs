//! Off-topic terminal stage.

use crate::error::Result;
use crate::nodes::HISTORY_REPLY_CHARS;
use crate::render::Block;
use crate::state::{ResponseFormat, StateUpdate, WorkingState};
use tracing::info;

pub const DECLINE_MESSAGE: &str = "I'm focused on helping with app portfolio analytics!

I can help you with questions about:
• App installs and downloads
• Revenue (in-app purchases & ads)
• User acquisition costs
• Performance by country or platform
• Trends and comparisons over time

What would you like to know about our apps?";

pub fn run(state: &WorkingState) -> Result<StateUpdate> {
    info!("Declining off-topic message");
    let history = state.history_with_reply(DECLINE_MESSAGE, HISTORY_REPLY_CHARS);
    Ok(StateUpdate {
        response_format: Some(ResponseFormat::Simple),
        response_text: Some(DECLINE_MESSAGE.to_string()),
        rendered_blocks: Some(Some(vec![Block::Text {
            text: DECLINE_MESSAGE.to_string(),
        }])),
        action_token: Some(None),
        ..history
    })
}
