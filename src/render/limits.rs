//! Size limits imposed by the chat transport

use crate::render::Block;
use crate::text::{truncate_chars, truncate_with_ellipsis};

pub const MAX_BLOCK_TEXT: usize = 3_000;
pub const MAX_BLOCKS: usize = 50;
pub const MAX_MESSAGE_TEXT: usize = 40_000;
pub const TRUNCATION_NOTICE: &str = "\n_(truncated)_";

const FENCE: &str = "```";

/// Cut a block's text to [`MAX_BLOCK_TEXT`] characters.
///
/// Fenced text is cut at a line boundary and the fence closed again; other
/// text is cut at the last word boundary. Either way the result ends with
/// [`TRUNCATION_NOTICE`].
pub fn truncate_block_text(text: &str) -> String {
    if text.chars().count() <= MAX_BLOCK_TEXT {
        return text.to_string();
    }
    let notice_len = TRUNCATION_NOTICE.chars().count();

    if text.trim_start().starts_with(FENCE) {
        let closing = format!("\n{}", FENCE);
        let budget = MAX_BLOCK_TEXT - notice_len - closing.len();
        let head = truncate_chars(text, budget);
        let cut = match head.rfind('\n') {
            Some(idx) if idx > 0 => &head[..idx],
            _ => head,
        };
        return format!("{}{}{}", cut, closing, TRUNCATION_NOTICE);
    }

    let budget = MAX_BLOCK_TEXT - notice_len;
    let head = truncate_chars(text, budget);
    let cut = match head.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => head[..idx].trim_end(),
        _ => head,
    };
    format!("{}{}", cut, TRUNCATION_NOTICE)
}

/// Apply per-block and block-count limits.
pub fn prepare_blocks(blocks: Vec<Block>) -> Vec<Block> {
    blocks
        .into_iter()
        .take(MAX_BLOCKS)
        .map(|block| match block {
            Block::Text { text } => Block::Text {
                text: truncate_block_text(&text),
            },
            Block::Table { text } => Block::Table {
                text: truncate_block_text(&text),
            },
            Block::Footnote { text } => Block::Footnote {
                text: truncate_block_text(&text),
            },
            other => other,
        })
        .collect()
}

/// Cap the plain-text fallback message.
pub fn truncate_message_text(text: &str) -> String {
    let marker = crate::text::ELLIPSIS.chars().count();
    if text.chars().count() <= MAX_MESSAGE_TEXT {
        return text.to_string();
    }
    truncate_with_ellipsis(text, MAX_MESSAGE_TEXT - marker)
}
