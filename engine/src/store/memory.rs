//! In-memory store for dry runs and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{value_text, Filter, Order, RemoteStore, Row, WriteMode};
use crate::error::{StoreError, StoreResult};

/// Rejects any write call containing a row whose `column` equals `value`,
/// the way a check constraint fails a whole statement.
#[derive(Debug, Clone)]
pub struct RejectRule {
    pub column: String,
    pub value: Value,
    pub message: String,
}

/// Record of one `insert` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub table: String,
    pub rows: usize,
    pub succeeded: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<WriteCall>>,
    rules: Vec<RejectRule>,
    unique: HashMap<String, String>,
    unavailable: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_when(mut self, column: &str, value: impl Into<Value>, message: &str) -> Self {
        self.rules.push(RejectRule {
            column: column.to_string(),
            value: value.into(),
            message: message.to_string(),
        });
        self
    }

    /// Enforce uniqueness of `column` in `table` for plain inserts.
    pub fn unique_on(mut self, table: &str, column: &str) -> Self {
        self.unique.insert(table.to_string(), column.to_string());
        self
    }

    /// Every call fails with [`StoreError::Unavailable`].
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    /// Seed a table with existing rows.
    pub fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.lock_tables().entry(table.to_string()).or_default().extend(rows);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock_tables().get(table).cloned().unwrap_or_default()
    }

    pub fn write_calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn apply_write(&self, table: &str, rows: &[Row], mode: &WriteMode) -> StoreResult<()> {
        for row in rows {
            if let Some(rule) = self.rules.iter().find(|r| row.get(&r.column) == Some(&r.value)) {
                return Err(StoreError::Rejected {
                    status: 400,
                    message: rule.message.clone(),
                });
            }
        }

        let mut tables = self.lock_tables();
        let existing = tables.entry(table.to_string()).or_default();

        match mode {
            WriteMode::Insert => {
                if let Some(column) = self.unique.get(table) {
                    let mut seen: Vec<String> = existing
                        .iter()
                        .filter_map(|r| r.get(column).map(value_text))
                        .collect();
                    for row in rows {
                        let key = row.get(column).map(value_text).unwrap_or_default();
                        if seen.contains(&key) {
                            return Err(StoreError::Rejected {
                                status: 409,
                                message: format!("duplicate key value violates unique constraint ({}={})", column, key),
                            });
                        }
                        seen.push(key);
                    }
                }
                existing.extend(rows.iter().cloned());
            }
            WriteMode::Upsert { on_conflict } => {
                let mut batch_keys: Vec<String> = Vec::with_capacity(rows.len());
                for row in rows {
                    let key = row.get(on_conflict).map(value_text).unwrap_or_default();
                    if batch_keys.contains(&key) {
                        return Err(StoreError::Rejected {
                            status: 500,
                            message: "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
                        });
                    }
                    batch_keys.push(key);
                }
                for (row, key) in rows.iter().zip(batch_keys) {
                    match existing
                        .iter_mut()
                        .find(|r| r.get(on_conflict).map(value_text).as_deref() == Some(key.as_str()))
                    {
                        Some(current) => {
                            for (k, v) in row {
                                current.insert(k.clone(), v.clone());
                            }
                        }
                        None => existing.push(row.clone()),
                    }
                }
            }
        }
        Ok(())
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn ping(&self, _table: &str) -> StoreResult<()> {
        self.check_available()
    }

    async fn insert(&self, table: &str, rows: &[Row], mode: &WriteMode) -> StoreResult<()> {
        self.check_available()?;
        let result = self.apply_write(table, rows, mode);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(WriteCall {
                table: table.to_string(),
                rows: rows.len(),
                succeeded: result.is_ok(),
            });
        result
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> StoreResult<u64> {
        self.check_available()?;
        let tables = self.lock_tables();
        let n = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches_all(r, filters)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    async fn select_column(
        &self,
        table: &str,
        column: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        self.check_available()?;
        let tables = self.lock_tables();
        let mut rows: Vec<&Row> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches_all(r, filters)).collect())
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ka = a.get(&order.column).map(value_text).unwrap_or_default();
                let kb = b.get(&order.column).map(value_text).unwrap_or_default();
                if order.descending {
                    kb.cmp(&ka)
                } else {
                    ka.cmp(&kb)
                }
            });
        }

        Ok(rows
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<u64> {
        self.check_available()?;
        if filters.is_empty() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "DELETE requires a filter".to_string(),
            });
        }
        let mut tables = self.lock_tables();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !matches_all(r, filters));
        Ok((before - rows.len()) as u64)
    }
}
