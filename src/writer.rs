use std::mem;

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::db::{Database, Row, TableSpec};

// queues grow past this on demand
const PREALLOC_ROWS: usize = 4096;

/// What to do when a batch statement fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Never,
    /// Resubmit the same batch once before giving up on it
    Once,
}

/// Queues rows and writes them as one multi-row statement per batch.
///
/// A batch never exceeds `max_rows`; reaching it flushes immediately. Rows
/// leave the queue when their flush starts, so a failed batch is dropped and
/// the next one starts empty.
pub struct BatchWriter<'a, D: Database + ?Sized> {
    db: &'a mut D,
    table: &'static TableSpec,
    queue: Vec<Row>,
    max_rows: usize,
    retry: RetryPolicy,
    rows_written: u64,
    batches: u64,
}

impl<'a, D: Database + ?Sized> BatchWriter<'a, D> {
    pub fn new(db: &'a mut D, table: &'static TableSpec, max_rows: usize) -> Self {
        let mut max_rows = max_rows.max(1);
        if let Some(limit) = db.max_batch_rows(table) {
            if max_rows > limit {
                warn!(
                    "batch size {} for {} exceeds backend limit, using {}",
                    max_rows, table.name, limit
                );
                max_rows = limit;
            }
        }

        Self {
            db,
            table,
            queue: Vec::with_capacity(max_rows.min(PREALLOC_ROWS)),
            max_rows,
            retry: RetryPolicy::Never,
            rows_written: 0,
            batches: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub async fn enqueue(&mut self, row: Row) -> Result<()> {
        self.queue.push(row);
        if self.queue.len() >= self.max_rows {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Writes the queue. Without `force` only a full queue is written.
    pub async fn flush(&mut self, force: bool) -> Result<()> {
        if self.queue.is_empty() || (!force && self.queue.len() < self.max_rows) {
            return Ok(());
        }

        let next = Vec::with_capacity(self.max_rows.min(PREALLOC_ROWS));
        let rows = mem::replace(&mut self.queue, next);
        let table = self.table;

        let result = match self.db.upsert(table, &rows).await {
            Err(e) if self.retry == RetryPolicy::Once => {
                error!(
                    "insert of {} rows into {} failed, trying again: {}",
                    rows.len(),
                    table.name,
                    e
                );
                self.db.upsert(table, &rows).await
            }
            other => other,
        };

        result.with_context(|| format!("batch of {} rows into {} lost", rows.len(), table.name))?;

        self.batches += 1;
        self.rows_written += rows.len() as u64;
        debug!(
            "flushed {} rows into {} (total {})",
            rows.len(),
            table.name,
            self.rows_written
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{col, OnConflict, SqlValue};
    use crate::error::DbError;
    use async_trait::async_trait;

    /// In-memory stand-in recording every statement it receives
    #[derive(Default)]
    pub(crate) struct RecordingDb {
        pub batches: Vec<(&'static str, Vec<Row>)>,
        pub statements: Vec<String>,
        pub query_rows: Vec<Vec<Option<String>>>,
        /// number of upcoming upserts that fail
        pub failures: usize,
        pub limit: Option<usize>,
    }

    #[async_trait]
    impl Database for RecordingDb {
        async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, DbError> {
            self.statements.push(sql.to_string());
            Ok(self.query_rows.clone())
        }

        async fn query_no_results(&mut self, sql: &str) -> Result<u64, DbError> {
            self.statements.push(sql.to_string());
            Ok(0)
        }

        async fn upsert(&mut self, table: &TableSpec, rows: &[Row]) -> Result<u64, DbError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(DbError::Closed);
            }
            self.batches.push((table.name, rows.to_vec()));
            Ok(rows.len() as u64)
        }

        async fn close(&mut self) -> Result<(), DbError> {
            Ok(())
        }

        fn max_batch_rows(&self, _table: &TableSpec) -> Option<usize> {
            self.limit
        }
    }

    static TABLE: TableSpec = TableSpec {
        name: "t",
        columns: &[col("n", "bigint")],
        conflict: OnConflict::Insert,
        dedupe: false,
    };

    fn row(n: i64) -> Row {
        vec![SqlValue::Int(n)]
    }

    #[tokio::test]
    async fn reaching_threshold_flushes_immediately() {
        let mut db = RecordingDb::default();
        let mut writer = BatchWriter::new(&mut db, &TABLE, 3);
        for n in 0..3 {
            writer.enqueue(row(n)).await.unwrap();
        }
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.batches(), 1);

        writer.enqueue(row(3)).await.unwrap();
        assert_eq!(writer.pending(), 1);
        writer.flush(true).await.unwrap();
        assert_eq!(writer.rows_written(), 4);

        assert_eq!(db.batches.len(), 2);
        assert_eq!(db.batches[0].1, vec![row(0), row(1), row(2)]);
        assert_eq!(db.batches[1].1, vec![row(3)]);
    }

    #[tokio::test]
    async fn huge_batch_size_without_backend_limit() {
        let mut db = RecordingDb::default();
        let mut writer = BatchWriter::new(&mut db, &TABLE, usize::MAX);
        assert_eq!(writer.max_rows(), usize::MAX);

        writer.enqueue(row(1)).await.unwrap();
        writer.enqueue(row(2)).await.unwrap();
        assert_eq!(writer.pending(), 2);
        writer.flush(true).await.unwrap();
        assert_eq!(db.batches.len(), 1);
        assert_eq!(db.batches[0].1.len(), 2);
    }

    #[tokio::test]
    async fn batches_never_exceed_max_rows() {
        let mut db = RecordingDb::default();
        let mut writer = BatchWriter::new(&mut db, &TABLE, 7);
        for n in 0..50 {
            writer.enqueue(row(n)).await.unwrap();
        }
        writer.flush(true).await.unwrap();

        assert!(db.batches.iter().all(|(_, rows)| rows.len() <= 7));
        let total: usize = db.batches.iter().map(|(_, rows)| rows.len()).sum();
        assert_eq!(total, 50);
        // insertion order survives batching
        let flat: Vec<Row> = db.batches.iter().flat_map(|(_, rows)| rows.clone()).collect();
        assert_eq!(flat, (0..50).map(row).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn flush_without_force_waits_for_full_queue() {
        let mut db = RecordingDb::default();
        let mut writer = BatchWriter::new(&mut db, &TABLE, 5);
        writer.enqueue(row(1)).await.unwrap();
        writer.flush(false).await.unwrap();
        assert_eq!(writer.pending(), 1);
        writer.flush(true).await.unwrap();
        writer.flush(true).await.unwrap();
        assert_eq!(db.batches.len(), 1);
    }

    #[tokio::test]
    async fn retry_once_recovers_single_failure() {
        let mut db = RecordingDb {
            failures: 1,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(&mut db, &TABLE, 2).with_retry(RetryPolicy::Once);
        writer.enqueue(row(1)).await.unwrap();
        writer.enqueue(row(2)).await.unwrap();
        assert_eq!(db.batches.len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped() {
        let mut db = RecordingDb {
            failures: 2,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(&mut db, &TABLE, 2).with_retry(RetryPolicy::Once);
        writer.enqueue(row(1)).await.unwrap();
        assert!(writer.enqueue(row(2)).await.is_err());
        assert_eq!(writer.pending(), 0);

        writer.enqueue(row(3)).await.unwrap();
        writer.flush(true).await.unwrap();
        assert_eq!(db.batches.len(), 1);
        assert_eq!(db.batches[0].1, vec![row(3)]);
    }

    #[tokio::test]
    async fn without_retry_errors_surface_at_once() {
        let mut db = RecordingDb {
            failures: 1,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(&mut db, &TABLE, 1);
        assert!(writer.enqueue(row(1)).await.is_err());
        writer.enqueue(row(2)).await.unwrap();
        assert_eq!(db.batches.len(), 1);
    }

    #[tokio::test]
    async fn backend_limit_caps_batch_size() {
        let mut db = RecordingDb {
            limit: Some(4),
            ..Default::default()
        };
        let writer = BatchWriter::new(&mut db, &TABLE, 100);
        assert_eq!(writer.max_rows(), 4);
    }
}
