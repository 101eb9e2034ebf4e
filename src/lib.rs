pub mod agent_prompts;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod render;
pub mod service;
pub mod state;
pub mod text;
pub mod validation;

pub use config::Settings;
pub use error::{ChatError, Result};
pub use graph::{Pipeline, TurnInput, TurnOutcome};
pub use service::{ChatReply, ChatService};
pub use state::WorkingState;
