//! Runtime settings loaded from the environment (and `.env` via dotenv).

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_STATE_DB: &str = "chat_state.db";

/// Where a thread's result cache survives between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDurability {
    /// In-process only; a cold thread replays persisted statements.
    Memory,
    /// Restored from the latest checkpoint's state blob.
    Checkpoint,
}

impl FromStr for CacheDurability {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheDurability::Memory),
            "checkpoint" => Ok(CacheDurability::Checkpoint),
            other => Err(ChatError::Config(format!(
                "CACHE_DURABILITY must be 'memory' or 'checkpoint', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub model: String,
    pub openai_base_url: String,

    /// Postgres metrics store. Takes precedence over `metrics_sqlite_path`.
    pub database_url: Option<String>,
    pub metrics_sqlite_path: Option<String>,

    /// SQLite file backing checkpoints and turn history.
    pub state_db_path: String,

    pub max_retries: u32,
    pub history_limit: usize,
    pub cache_durability: CacheDurability,
    pub statement_timeout: Duration,
    pub history_retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            database_url: None,
            metrics_sqlite_path: None,
            state_db_path: DEFAULT_STATE_DB.to_string(),
            max_retries: 3,
            history_limit: 10,
            cache_durability: CacheDurability::Memory,
            statement_timeout: Duration::from_secs(30),
            history_retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl Settings {
    /// Read settings from process environment. Call `dotenv::dotenv()` first
    /// if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let statement_timeout_secs: u64 =
            parse_or(non_empty("STATEMENT_TIMEOUT_SECS"), "STATEMENT_TIMEOUT_SECS", 30)?;
        let retention_hours: u64 =
            parse_or(non_empty("HISTORY_RETENTION_HOURS"), "HISTORY_RETENTION_HOURS", 24)?;

        Ok(Self {
            openai_api_key: non_empty("OPENAI_API_KEY").unwrap_or_default(),
            model: non_empty("AI_MODEL").unwrap_or(defaults.model),
            openai_base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            database_url: non_empty("DATABASE_URL"),
            metrics_sqlite_path: non_empty("METRICS_SQLITE_PATH"),
            state_db_path: non_empty("STATE_DB_PATH").unwrap_or(defaults.state_db_path),
            max_retries: parse_or(non_empty("MAX_RETRIES"), "MAX_RETRIES", defaults.max_retries)?,
            history_limit: parse_or(
                non_empty("HISTORY_LIMIT"),
                "HISTORY_LIMIT",
                defaults.history_limit,
            )?,
            cache_durability: match non_empty("CACHE_DURABILITY") {
                Some(v) => v.parse()?,
                None => defaults.cache_durability,
            },
            statement_timeout: Duration::from_secs(statement_timeout_secs),
            history_retention: Duration::from_secs(retention_hours * 3600),
        })
    }

    /// The gateway needs a key; everything else has a usable default.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.openai_api_key.is_empty() {
            return Err(ChatError::Config("OPENAI_API_KEY is not set".to_string()));
        }
        Ok(&self.openai_api_key)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ChatError::Config(format!("{} has an invalid value: '{}'", key, v))),
        None => Ok(default),
    }
}
