//! Batch loader with per-record fallback.
//!
//! ```text
//!   records ──chunk(batch_size)──▶ write batch ──ok──▶ written += n
//!                                      │
//!                                      └─err──▶ write each record alone
//!                                                 ├─ok──▶ written += 1
//!                                                 └─err─▶ RecordFailure
//! ```
//!
//! One bad record costs one record, not its whole batch. Every record ends
//! up counted exactly once, so `written + failed == attempted` always holds.

use serde::Serialize;
use std::time::Duration;

use crate::assemble::NormalizedRecord;
use crate::store::{RemoteStore, Row, WriteMode};

/// A record the store refused, with enough context to find it in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub natural_key: String,
    pub line: usize,
    /// 1-based batch number the record belonged to
    pub batch: usize,
    pub error: String,
}

/// Totals for one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub attempted: usize,
    pub written: usize,
    pub failed: usize,
    pub batches: usize,
    /// Batches that had to be retried record by record
    pub fallback_batches: usize,
    pub failures: Vec<RecordFailure>,
}

impl LoadOutcome {
    /// Percentage of attempted records that were written.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.written as f64 * 100.0 / self.attempted as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub pace: Duration,
    pub mode: WriteMode,
}

/// Writes records to one table through a [`RemoteStore`].
pub struct BatchLoader<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    table: &'a str,
    options: LoadOptions,
}

impl<'a, S: RemoteStore + ?Sized> BatchLoader<'a, S> {
    pub fn new(store: &'a S, table: &'a str, options: LoadOptions) -> Self {
        let batch_size = options.batch_size.max(1);
        Self {
            store,
            table,
            options: LoadOptions { batch_size, ..options },
        }
    }

    /// Load every record, in order.
    pub async fn load(&self, records: &[NormalizedRecord]) -> LoadOutcome {
        let mut outcome = LoadOutcome {
            attempted: records.len(),
            ..LoadOutcome::default()
        };
        let total_batches = records.len().div_ceil(self.options.batch_size);

        for (idx, chunk) in records.chunks(self.options.batch_size).enumerate() {
            let batch = idx + 1;
            if idx > 0 && !self.options.pace.is_zero() {
                tokio::time::sleep(self.options.pace).await;
            }

            let rows: Vec<Row> = chunk.iter().map(NormalizedRecord::to_row).collect();
            outcome.batches += 1;

            match self.store.insert(self.table, &rows, &self.options.mode).await {
                Ok(()) => {
                    outcome.written += chunk.len();
                    tracing::info!(batch, total_batches, records = chunk.len(), "batch written");
                }
                Err(e) => {
                    outcome.fallback_batches += 1;
                    tracing::warn!(batch, total_batches, error = %e, "batch rejected, retrying records individually");
                    self.isolate(chunk, rows, batch, &mut outcome).await;
                }
            }
        }

        tracing::info!(
            attempted = outcome.attempted,
            written = outcome.written,
            failed = outcome.failed,
            fallback_batches = outcome.fallback_batches,
            "load finished"
        );
        outcome
    }

    async fn isolate(&self, chunk: &[NormalizedRecord], rows: Vec<Row>, batch: usize, outcome: &mut LoadOutcome) {
        let mut recovered = 0usize;
        for (record, row) in chunk.iter().zip(rows) {
            match self.store.insert(self.table, std::slice::from_ref(&row), &self.options.mode).await {
                Ok(()) => {
                    outcome.written += 1;
                    recovered += 1;
                }
                Err(e) => {
                    tracing::error!(
                        batch,
                        key = %record.natural_key,
                        line = record.line,
                        error = %e,
                        "record rejected"
                    );
                    outcome.failed += 1;
                    outcome.failures.push(RecordFailure {
                        natural_key: record.natural_key.clone(),
                        line: record.line,
                        batch,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(batch, recovered, failed = chunk.len() - recovered, "batch isolation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldValue;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn record(key: &str, line: usize) -> NormalizedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("codigo".to_string(), FieldValue::Text(key.to_string()));
        NormalizedRecord {
            natural_key: key.to_string(),
            line,
            fields,
        }
    }

    fn options(batch_size: usize) -> LoadOptions {
        LoadOptions {
            batch_size,
            pace: Duration::ZERO,
            mode: WriteMode::Insert,
        }
    }

    #[tokio::test]
    async fn test_all_batches_written() {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..25).map(|i| record(&i.to_string(), i + 2)).collect();
        let outcome = BatchLoader::new(&store, "t", options(10)).load(&records).await;

        assert_eq!(outcome.attempted, 25);
        assert_eq!(outcome.written, 25);
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.fallback_batches, 0);
        assert_eq!(store.write_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_bad_record_isolated() {
        let store = MemoryStore::new().reject_when("codigo", "7", "violates check constraint");
        let records: Vec<_> = (0..10).map(|i| record(&i.to_string(), i + 2)).collect();
        let outcome = BatchLoader::new(&store, "t", options(5)).load(&records).await;

        assert_eq!(outcome.written, 9);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.written + outcome.failed, outcome.attempted);
        assert_eq!(
            outcome.failures,
            vec![RecordFailure {
                natural_key: "7".into(),
                line: 9,
                batch: 2,
                error: "Store rejected request (HTTP 400): violates check constraint".into(),
            }]
        );
        // 1 ok batch, 1 failed batch, 5 single-record calls
        assert_eq!(store.write_calls().len(), 7);
        assert_eq!(store.rows("t").len(), 9);
    }

    #[tokio::test]
    async fn test_failure_never_double_counted() {
        let store = MemoryStore::new().unavailable("down");
        let records: Vec<_> = (0..4).map(|i| record(&i.to_string(), i + 2)).collect();
        let outcome = BatchLoader::new(&store, "t", options(2)).load(&records).await;

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.failed, 4);
        assert_eq!(outcome.failures.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = MemoryStore::new();
        let outcome = BatchLoader::new(&store, "t", options(100)).load(&[]).await;
        assert_eq!(outcome, LoadOutcome::default());
        assert_eq!(outcome.success_rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_batches_only() {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..3).map(|i| record(&i.to_string(), i + 2)).collect();
        let opts = LoadOptions {
            pace: Duration::from_millis(500),
            ..options(1)
        };
        let start = tokio::time::Instant::now();
        BatchLoader::new(&store, "t", opts).load(&records).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);
    }
}
