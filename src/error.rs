use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// The message without the category prefix, for errors that are shown
    /// inside another sentence.
    pub fn detail(&self) -> String {
        match self {
            ChatError::Config(m)
            | ChatError::Llm(m)
            | ChatError::Execution(m)
            | ChatError::Persistence(m)
            | ChatError::Serialization(m)
            | ChatError::Pipeline(m)
            | ChatError::Export(m) => m.clone(),
            ChatError::Database(e) => e.to_string(),
            ChatError::Sqlite(e) => e.to_string(),
            ChatError::Io(e) => e.to_string(),
            ChatError::Json(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_drops_category_prefix() {
        let err = ChatError::Execution("statement timeout".into());
        assert_eq!(err.to_string(), "Execution error: statement timeout");
        assert_eq!(err.detail(), "statement timeout");
    }
}
