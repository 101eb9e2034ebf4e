//! Validation stage: gate between generation and execution.

use crate::error::Result;
use crate::state::{StateUpdate, WorkingState};
use crate::validation::{validate_statement, Rejection};
use tracing::{info, warn};

pub fn run(state: &WorkingState) -> Result<StateUpdate> {
    let statement = state.generated_statement.as_deref().unwrap_or("").trim();

    // Keep the generator's own explanation when it produced nothing.
    if statement.is_empty() {
        let error = state
            .statement_error
            .clone()
            .unwrap_or_else(|| Rejection::Empty.to_string());
        warn!(error = %error, "No statement to validate");
        return Ok(rejected(error));
    }

    match validate_statement(statement) {
        Ok(()) => {
            info!("Statement passed validation");
            Ok(StateUpdate {
                statement_valid: Some(true),
                statement_error: Some(None),
                ..Default::default()
            })
        }
        Err(rejection) => {
            warn!(rejection = %rejection, statement, "Statement rejected");
            Ok(rejected(rejection.to_string()))
        }
    }
}

fn rejected(error: String) -> StateUpdate {
    StateUpdate {
        statement_valid: Some(false),
        statement_error: Some(Some(error)),
        ..Default::default()
    }
}
