//! Rendering of one multi-row INSERT per batch.

use std::sync::Arc;

use sea_orm::{DbBackend, Statement};

use crate::hasher::Hasher;
use crate::identity::IdGenerator;
use crate::sink::{FailureSink, sink_all};
use crate::values::{BatchItem, COLUMNS, FailedRecord, ValueBuilder};

/// Target table and its five insert columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub table: String,
    pub columns: [String; COLUMNS],
}

impl Default for TableShape {
    fn default() -> Self {
        Self {
            table: "tx_log".into(),
            columns: ["id", "req_hash", "headers", "body", "created_at"].map(String::from),
        }
    }
}

impl TableShape {
    /// `INSERT INTO t (c1, ...) VALUES (?,?,?,?,?),...;` for `rows` rows.
    pub fn insert_sql(&self, rows: usize) -> String {
        let group = format!("({})", vec!["?"; COLUMNS].join(","));
        let groups = vec![group.as_str(); rows].join(",");
        format!(
            "INSERT INTO {} ({}) VALUES {};",
            self.table,
            self.columns.join(", "),
            groups
        )
    }
}

/// An INSERT for part of a batch and the batch positions it covers.
#[derive(Debug, Clone)]
pub struct PreparedInsert {
    pub statement: Statement,
    pub rows: Vec<usize>,
}

/// Turns a batch into something executable. `None` means there is
/// nothing to run for this batch; it is not an error. Items left out of
/// the statement have already been handed to a failure sink.
pub trait BuildStatement<T>: Send {
    fn build(&mut self, batch: &[T]) -> Option<PreparedInsert>;
}

pub struct SqlBuilder<H, G> {
    values: ValueBuilder<H, G>,
    shape: TableShape,
    backend: DbBackend,
    failed: Arc<dyn FailureSink>,
}

impl<H: Hasher, G: IdGenerator> SqlBuilder<H, G> {
    pub fn new(
        hasher: H,
        ids: G,
        shape: TableShape,
        backend: DbBackend,
        failed: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            values: ValueBuilder::new(hasher, ids),
            shape,
            backend,
            failed,
        }
    }

    pub fn shape(&self) -> &TableShape {
        &self.shape
    }
}

impl<T, H, G> BuildStatement<T> for SqlBuilder<H, G>
where
    T: BatchItem,
    H: Hasher,
    G: IdGenerator,
{
    fn build(&mut self, batch: &[T]) -> Option<PreparedInsert> {
        let built = match self.values.build(batch) {
            Ok(built) => built,
            Err(e) => {
                log::error!("error building values: {}", e);
                let all: Vec<FailedRecord> = batch
                    .iter()
                    .enumerate()
                    .map(|(index, item)| match item.tx_record() {
                        Some(record) => FailedRecord::Record(record.clone()),
                        None => FailedRecord::Unrecognized { index },
                    })
                    .collect();
                sink_all(self.failed.as_ref(), &all);
                return None;
            }
        };

        if !built.failed.is_empty() {
            log::error!("{} records could not be converted", built.failed.len());
            sink_all(self.failed.as_ref(), &built.failed);
        }
        if built.count == 0 {
            return None;
        }

        Some(PreparedInsert {
            statement: Statement::from_sql_and_values(
                self.backend,
                self.shape.insert_sql(built.count),
                built.args,
            ),
            rows: built.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::XxHasher;
    use crate::identity::UuidGenerator;
    use crate::sink::testing::{BrokenSink, MemorySink};
    use crate::values::testing::{FlakyIds, record};

    fn sql_builder(sink: Arc<dyn FailureSink>) -> SqlBuilder<XxHasher, UuidGenerator> {
        SqlBuilder::new(
            XxHasher::default(),
            UuidGenerator,
            TableShape::default(),
            DbBackend::Sqlite,
            sink,
        )
    }

    #[test]
    fn renders_one_group_per_row() {
        let sink = Arc::new(MemorySink::default());
        let mut builder = sql_builder(sink.clone());
        let batch = vec![record("GET http://localhost/a", ""), record("GET http://localhost/b", "b")];

        let prepared = builder.build(&batch).unwrap();
        assert_eq!(prepared.rows, vec![0, 1]);
        let stmt = prepared.statement;
        assert_eq!(
            stmt.sql,
            "INSERT INTO tx_log (id, req_hash, headers, body, created_at) \
             VALUES (?,?,?,?,?),(?,?,?,?,?);"
        );
        assert_eq!(stmt.values.unwrap().0.len(), 2 * COLUMNS);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn custom_shape_is_honoured() {
        let shape = TableShape {
            table: "audit".into(),
            columns: ["a", "b", "c", "d", "e"].map(String::from),
        };
        assert_eq!(shape.insert_sql(1), "INSERT INTO audit (a, b, c, d, e) VALUES (?,?,?,?,?);");
    }

    #[test]
    fn batch_fatal_error_sinks_every_record() {
        let sink = Arc::new(MemorySink::default());
        let mut builder = sql_builder(sink.clone());
        let batch = vec![record("GET http://localhost/a", ""), record("", "")];

        assert!(builder.build(&batch).is_none());
        assert_eq!(sink.lines().len(), 2);
    }

    #[test]
    fn per_record_failures_are_sunk_and_rest_inserted() {
        let sink = Arc::new(MemorySink::default());
        let mut builder = SqlBuilder::new(
            XxHasher::default(),
            FlakyIds { calls: 0, fail_at: 0 },
            TableShape::default(),
            DbBackend::Sqlite,
            sink.clone(),
        );
        let batch = vec![record("GET http://localhost/a", ""), record("GET http://localhost/b", "")];

        let prepared = builder.build(&batch).unwrap();
        assert_eq!(prepared.rows, vec![1]);
        assert_eq!(prepared.statement.values.unwrap().0.len(), COLUMNS);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("http://localhost/a"));
    }

    #[test]
    fn empty_batch_builds_nothing() {
        let mut builder = sql_builder(Arc::new(MemorySink::default()));
        let batch: Vec<txlog_shared::TxRecord> = Vec::new();
        assert!(builder.build(&batch).is_none());
    }

    #[test]
    fn broken_sink_is_not_fatal() {
        let mut builder = sql_builder(Arc::new(BrokenSink));
        assert!(builder.build(&[record("", "")]).is_none());
    }
}
