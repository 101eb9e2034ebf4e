//! Error terminal stage, reached once retries are exhausted.

use crate::error::Result;
use crate::nodes::HISTORY_REPLY_CHARS;
use crate::render::Block;
use crate::state::{ResponseFormat, StateUpdate, WorkingState};
use crate::text::truncate_with_ellipsis;
use tracing::error;

pub const READ_ONLY_EXPLANATION: &str = "I can only run read-only queries. I cannot modify any data.";
pub const EXECUTION_EXPLANATION: &str = "I had trouble running the query. The data might not exist \
or the question might need to be rephrased.";
pub const UNDERSTANDING_EXPLANATION: &str = "I had trouble understanding how to query for that \
information. Could you try rephrasing your question?";

/// Map an internal error to what the user is told.
pub fn explain(statement_error: &str) -> String {
    let lower = statement_error.to_lowercase();
    if lower.contains("write operation") || lower.contains("permitted") {
        READ_ONLY_EXPLANATION.to_string()
    } else if lower.contains("execution failed") {
        EXECUTION_EXPLANATION.to_string()
    } else if lower.contains("parse") || lower.contains("generation failed") {
        UNDERSTANDING_EXPLANATION.to_string()
    } else {
        format!(
            "I encountered an issue while processing your request. Technical details: {}",
            statement_error
        )
    }
}

pub fn run(state: &WorkingState) -> Result<StateUpdate> {
    let raw = state.statement_error.as_deref().unwrap_or("Unknown error");
    error!(
        error = %raw,
        retry_count = state.retry_count,
        statement = ?state.generated_statement,
        "Turn failed after retries"
    );

    let text = format!(
        "Sorry, I couldn't answer your question.\n\n{}\n\n_Original question: \"{}\"_",
        explain(raw),
        truncate_with_ellipsis(&state.user_query, 100)
    );
    let history = state.history_with_reply(&text, HISTORY_REPLY_CHARS);
    Ok(StateUpdate {
        response_format: Some(ResponseFormat::Error),
        rendered_blocks: Some(Some(vec![Block::Text { text: text.clone() }])),
        response_text: Some(text),
        action_token: Some(None),
        ..history
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explanations() {
        assert_eq!(
            explain("Write operation 'DROP' not allowed. Only SELECT queries are permitted."),
            READ_ONLY_EXPLANATION
        );
        assert_eq!(explain("Execution failed: timeout"), EXECUTION_EXPLANATION);
        assert_eq!(explain("SQL parse error: Expected )"), UNDERSTANDING_EXPLANATION);
        assert!(explain("something odd").contains("Technical details: something odd"));
    }

    #[test]
    fn test_error_response_quotes_truncated_question() {
        let mut state = WorkingState::new("x".repeat(150), "t");
        state.statement_error = Some("Execution failed: boom".into());
        let after = state.clone().apply(run(&state).unwrap());

        assert_eq!(after.response_format, ResponseFormat::Error);
        assert!(after.response_text.starts_with("Sorry, I couldn't answer your question."));
        assert!(after.response_text.contains(EXECUTION_EXPLANATION));
        assert!(after
            .response_text
            .ends_with(&format!("_Original question: \"{}...\"_", "x".repeat(100))));
        assert_eq!(after.conversation_history.len(), 1);
    }
}
