//! Business database execution capability.
//!
//! Tools never talk to [`Database`] directly. They go through
//! [`GuardedDatabase`], which runs the SQL safety validator first so that a
//! refused statement never reaches the execution capability.

mod fixtures;
mod sqlite;

pub use fixtures::*;
pub use sqlite::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::error::{QueryResult, ToolResult};
use crate::sql::{self, ExecutionPath};

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Integer(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Real(value)
    }
}

/// Raw execution capability over the business database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a statement and return its rows.
    async fn execute_read(&self, sql: &str, params: &[SqlParam]) -> QueryResult<Vec<Row>>;

    /// Run a statement and return the affected row count.
    async fn execute_write(&self, sql: &str, params: &[SqlParam]) -> QueryResult<u64>;
}

/// Validator-fronted access to a [`Database`].
#[derive(Clone)]
pub struct GuardedDatabase {
    inner: Arc<dyn Database>,
}

impl GuardedDatabase {
    /// Wrap an execution capability.
    pub fn new(inner: Arc<dyn Database>) -> Self {
        Self { inner }
    }

    /// Execute on the read-only path. Anything but a read-only statement is refused.
    pub async fn read(&self, sql: &str, params: &[SqlParam]) -> ToolResult<Vec<Row>> {
        self.guard(sql, ExecutionPath::Read)?;
        Ok(self.inner.execute_read(sql, params).await?)
    }

    /// Execute on the write path. Rejected-class statements are still refused.
    pub async fn write(&self, sql: &str, params: &[SqlParam]) -> ToolResult<u64> {
        self.guard(sql, ExecutionPath::Write)?;
        Ok(self.inner.execute_write(sql, params).await?)
    }

    fn guard(&self, sql: &str, path: ExecutionPath) -> ToolResult<()> {
        if let Err(e) = sql::check(sql, path) {
            warn!(
                path = ?path,
                class = %e.class,
                reason = %e.reason,
                "Refused SQL statement"
            );
            return Err(e.into());
        }
        Ok(())
    }
}
