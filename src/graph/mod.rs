//! Conversational query pipeline
//!
//! Drives one turn through the stages in [`crate::nodes`]:
//!
//! ```text
//! intent_router -> context_resolver -> generator -> validator -> executor -> interpreter -> renderer
//!       |                                  ^            |            |
//!       |                                  +-- retry ---+------------+
//!       +-> export | show_query | decline            error
//! ```
//!
//! Each stage returns a partial update that is folded into the state before
//! the routing function for that stage picks the successor.

pub mod routing;

use crate::cache::ResultCache;
use crate::db::{encode_state, CheckpointStore};
use crate::error::{ChatError, Result};
use crate::nodes::{self, NodeContext};
use crate::render::limits::{prepare_blocks, truncate_message_text};
use crate::state::{HistoryEntry, Message, StateUpdate, WorkingState};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use routing::{next_step, NextStep, Node};

/// Steps every turn may take outside the retry loop.
const BASE_STEPS: usize = 5;

/// Stages visited per retry: generator, validator, executor.
const STEPS_PER_ATTEMPT: usize = 3;

/// Everything the caller supplies for a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub user_query: String,
    pub thread_id: String,
    pub conversation_history: Vec<HistoryEntry>,
    pub result_cache: ResultCache,
    /// Preset by action clicks so export / show-query target a specific result.
    pub referenced_result_id: Option<String>,
}

impl TurnInput {
    pub fn new(user_query: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: WorkingState,
    /// Stages in the order they ran.
    pub trace: Vec<Node>,
    /// Checkpoint written for this turn, if the store accepted it.
    pub checkpoint_id: Option<String>,
}

impl TurnOutcome {
    pub fn visited(&self, node: Node) -> usize {
        self.trace.iter().filter(|n| **n == node).count()
    }
}

/// The compiled state machine. Build once and share across turns.
pub struct Pipeline {
    ctx: NodeContext,
    max_retries: u32,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Pipeline {
    pub fn new(ctx: NodeContext, max_retries: u32) -> Self {
        Self {
            ctx,
            max_retries,
            checkpoints: None,
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn step_limit(&self) -> usize {
        BASE_STEPS + STEPS_PER_ATTEMPT * (self.max_retries as usize + 1)
    }

    fn initial_state(input: TurnInput) -> WorkingState {
        let messages = input
            .conversation_history
            .iter()
            .flat_map(|h| {
                [
                    Message::Human {
                        content: h.user.clone(),
                    },
                    Message::Ai {
                        content: h.bot.clone(),
                    },
                ]
            })
            .collect();
        WorkingState {
            user_query: input.user_query,
            thread_id: input.thread_id,
            conversation_history: input.conversation_history,
            messages,
            result_cache: input.result_cache,
            referenced_result_id: input.referenced_result_id,
            ..Default::default()
        }
    }

    async fn run_node(&self, node: Node, state: &WorkingState) -> Result<StateUpdate> {
        let ctx = &self.ctx;
        match node {
            Node::IntentRouter => nodes::intent_router::run(state, ctx).await,
            Node::ContextResolver => nodes::context_resolver::run(state, ctx).await,
            Node::Generator => nodes::generator::run(state, ctx).await,
            Node::Validator => nodes::validator::run(state),
            Node::Executor => nodes::executor::run(state, ctx).await,
            Node::Interpreter => nodes::interpreter::run(state, ctx).await,
            Node::Renderer => nodes::renderer::run(state),
            Node::Export => nodes::export::run(state),
            Node::ShowQuery => nodes::show_query::run(state, ctx).await,
            Node::Decline => nodes::decline::run(state),
            Node::Error => nodes::error_handler::run(state),
        }
    }

    /// Run one turn to completion and checkpoint the final state.
    pub async fn run(&self, input: TurnInput) -> Result<TurnOutcome> {
        let span = info_span!("turn", thread_id = %input.thread_id);
        self.run_turn(input).instrument(span).await
    }

    async fn run_turn(&self, input: TurnInput) -> Result<TurnOutcome> {
        let mut state = Self::initial_state(input);
        let mut trace = Vec::new();
        let mut node = Node::IntentRouter;
        let limit = self.step_limit();

        info!(thread_id = %state.thread_id, "Turn started");
        loop {
            if trace.len() >= limit {
                warn!(thread_id = %state.thread_id, steps = trace.len(), "Step limit reached");
                return Err(ChatError::Pipeline(format!(
                    "Turn exceeded {} steps without finishing",
                    limit
                )));
            }

            debug!(node = %node, retry_count = state.retry_count, "Running stage");
            let update = self
                .run_node(node, &state)
                .instrument(info_span!("node", node = node.as_str()))
                .await?;
            state = state.apply(update);
            trace.push(node);

            match next_step(node, &state, self.max_retries) {
                NextStep::Goto(next) => node = next,
                NextStep::End => break,
            }
        }

        // Every terminal stage ends here, so transport limits apply once.
        state.rendered_blocks = state.rendered_blocks.take().map(prepare_blocks);
        state.response_text = truncate_message_text(&state.response_text);

        info!(
            thread_id = %state.thread_id,
            intent = ?state.intent,
            retry_count = state.retry_count,
            result_id = ?state.current_result_id,
            steps = trace.len(),
            "Turn finished"
        );

        let checkpoint_id = self.checkpoint(&state, &trace).await;
        Ok(TurnOutcome {
            state,
            trace,
            checkpoint_id,
        })
    }

    /// Append a checkpoint linked to the thread's previous one. Failures are
    /// logged and never fail the turn.
    async fn checkpoint(&self, state: &WorkingState, trace: &[Node]) -> Option<String> {
        let store = self.checkpoints.as_ref()?;
        let thread = state.thread_id.as_str();

        let result: Result<String> = async {
            let checkpoint_id = Uuid::new_v4().to_string();
            let blob = encode_state(state)?;
            let metadata = json!({
                "source": "turn",
                "intent": state.intent.map(|i| i.as_str()),
                "steps": trace.iter().map(Node::as_str).collect::<Vec<_>>(),
                "retry_count": state.retry_count,
            });
            store.append(thread, &checkpoint_id, &blob, &metadata).await?;
            Ok(checkpoint_id)
        }
        .await;

        match result {
            Ok(id) => {
                debug!(thread_id = thread, checkpoint_id = %id, "Checkpoint written");
                Some(id)
            }
            Err(e) => {
                warn!(thread_id = thread, error = %e, "Failed to write checkpoint");
                None
            }
        }
    }
}
