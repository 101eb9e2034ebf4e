//! Query Engine Trait - contract for stores that run user statements
//!
//! Engines must run every statement read-only and discard any effect it
//! might have had: the session used here is never the one that writes
//! checkpoints or history.

use crate::error::Result;
use crate::execution::result::QueryOutput;
use async_trait::async_trait;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Engine name (e.g. "postgres", "sqlite")
    fn name(&self) -> &'static str;

    /// Run a validated statement and return its rows in column order.
    async fn execute(&self, statement: &str) -> Result<QueryOutput>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<()> {
        self.execute("SELECT 1").await.map(|_| ())
    }
}
