//! EXPLAIN collaborator used when a session is flushed.

use serde_json::Value;

use crate::error::Result;

/// Produces a query plan for one statement.
///
/// Rows are returned as loose JSON objects, since plan columns differ per
/// database. Implementations must not execute the statement itself.
pub trait Explainer: Send + Sync {
    fn explain(&self, query: &str) -> Result<Vec<Value>>;
}

impl<F> Explainer for F
where
    F: Fn(&str) -> Result<Vec<Value>> + Send + Sync,
{
    fn explain(&self, query: &str) -> Result<Vec<Value>> {
        self(query)
    }
}
