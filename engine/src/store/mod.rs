//! Remote store abstraction.
//!
//! The pipeline talks to the target table only through [`RemoteStore`].
//! [`PostgrestStore`] speaks the Supabase REST dialect; [`MemoryStore`]
//! backs dry runs and tests.

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreResult;

pub use memory::{MemoryStore, RejectRule};
pub use postgrest::PostgrestStore;

/// One row as sent to the store.
pub type Row = Map<String, Value>;

/// How a write call treats rows that already exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    /// Merge on the given conflict column
    Upsert { on_conflict: String },
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Does `row` satisfy this filter? Non-string values compare by their JSON text.
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column)
            .map(|v| value_text(v) == self.value)
            .unwrap_or(false)
    }
}

/// Sort order for [`RemoteStore::select_column`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Text rendering of a JSON scalar, without quotes for strings.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability and credential check against `table`.
    ///
    /// Any failure is reported as [`crate::error::StoreError::Unavailable`].
    async fn ping(&self, table: &str) -> StoreResult<()>;

    /// Write `rows` in a single call. Either every row is written or the
    /// call fails as a whole.
    async fn insert(&self, table: &str, rows: &[Row], mode: &WriteMode) -> StoreResult<()>;

    /// Exact number of rows matching all `filters`.
    async fn count(&self, table: &str, filters: &[Filter]) -> StoreResult<u64>;

    /// Values of `column` for rows matching all `filters`.
    async fn select_column(
        &self,
        table: &str,
        column: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>>;

    /// Delete rows matching all `filters`; returns how many were removed.
    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<u64>;
}
