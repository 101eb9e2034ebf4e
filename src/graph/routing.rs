//! Stage identifiers and the conditional edges between them.

use crate::state::{Intent, WorkingState};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    IntentRouter,
    ContextResolver,
    Generator,
    Validator,
    Executor,
    Interpreter,
    Renderer,
    Export,
    ShowQuery,
    Decline,
    Error,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::IntentRouter => "intent_router",
            Node::ContextResolver => "context_resolver",
            Node::Generator => "generator",
            Node::Validator => "validator",
            Node::Executor => "executor",
            Node::Interpreter => "interpreter",
            Node::Renderer => "renderer",
            Node::Export => "export",
            Node::ShowQuery => "show_query",
            Node::Decline => "decline",
            Node::Error => "error",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Goto(Node),
    End,
}

/// Edge out of the intent router. A missing intent is treated as a new
/// analytics question.
pub fn route_by_intent(state: &WorkingState) -> Node {
    match state.intent.unwrap_or(Intent::AnalyticsQuery) {
        Intent::AnalyticsQuery | Intent::FollowUp => Node::ContextResolver,
        Intent::Export => Node::Export,
        Intent::ShowQuery => Node::ShowQuery,
        Intent::OffTopic => Node::Decline,
    }
}

fn retry_or_fail(state: &WorkingState, max_retries: u32) -> Node {
    if state.retry_count <= max_retries {
        Node::Generator
    } else {
        Node::Error
    }
}

pub fn route_after_validation(state: &WorkingState, max_retries: u32) -> Node {
    if state.statement_valid {
        Node::Executor
    } else {
        retry_or_fail(state, max_retries)
    }
}

pub fn route_after_execution(state: &WorkingState, max_retries: u32) -> Node {
    if state.statement_error.is_none() && state.result_rows.is_some() {
        Node::Interpreter
    } else {
        retry_or_fail(state, max_retries)
    }
}

/// Successor of `node` given the state it just produced.
pub fn next_step(node: Node, state: &WorkingState, max_retries: u32) -> NextStep {
    match node {
        Node::IntentRouter => NextStep::Goto(route_by_intent(state)),
        Node::ContextResolver => NextStep::Goto(Node::Generator),
        Node::Generator => NextStep::Goto(Node::Validator),
        Node::Validator => NextStep::Goto(route_after_validation(state, max_retries)),
        Node::Executor => NextStep::Goto(route_after_execution(state, max_retries)),
        Node::Interpreter => NextStep::Goto(Node::Renderer),
        Node::Renderer | Node::Export | Node::ShowQuery | Node::Decline | Node::Error => {
            NextStep::End
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_intent(intent: Intent) -> WorkingState {
        let mut state = WorkingState::new("q", "t");
        state.intent = Some(intent);
        state
    }

    #[test]
    fn test_intent_edges() {
        assert_eq!(route_by_intent(&with_intent(Intent::AnalyticsQuery)), Node::ContextResolver);
        assert_eq!(route_by_intent(&with_intent(Intent::FollowUp)), Node::ContextResolver);
        assert_eq!(route_by_intent(&with_intent(Intent::Export)), Node::Export);
        assert_eq!(route_by_intent(&with_intent(Intent::ShowQuery)), Node::ShowQuery);
        assert_eq!(route_by_intent(&with_intent(Intent::OffTopic)), Node::Decline);
        assert_eq!(route_by_intent(&WorkingState::new("q", "t")), Node::ContextResolver);
    }

    #[test]
    fn test_retry_bound_is_shared() {
        let mut state = WorkingState::new("q", "t");
        state.statement_error = Some("boom".into());
        for count in 1..=3 {
            state.retry_count = count;
            assert_eq!(route_after_validation(&state, 3), Node::Generator);
            assert_eq!(route_after_execution(&state, 3), Node::Generator);
        }
        state.retry_count = 4;
        assert_eq!(route_after_validation(&state, 3), Node::Error);
        assert_eq!(route_after_execution(&state, 3), Node::Error);
    }

    #[test]
    fn test_success_edges() {
        let mut state = WorkingState::new("q", "t");
        state.statement_valid = true;
        state.retry_count = 9;
        assert_eq!(route_after_validation(&state, 3), Node::Executor);
        state.result_rows = Some(Vec::new());
        assert_eq!(route_after_execution(&state, 3), Node::Interpreter);
    }

    #[test]
    fn test_terminals_end() {
        let state = WorkingState::new("q", "t");
        for node in [Node::Renderer, Node::Export, Node::ShowQuery, Node::Decline, Node::Error] {
            assert_eq!(next_step(node, &state, 3), NextStep::End);
        }
        assert_eq!(next_step(Node::Interpreter, &state, 3), NextStep::Goto(Node::Renderer));
    }
}
