//! Conversion of buffered records into flat, row-major insert arguments.

use sea_orm::Value;
use thiserror::Error;
use txlog_shared::TxRecord;

use crate::hasher::{HashError, Hasher, fingerprint};
use crate::identity::IdGenerator;
use crate::sink::SinkLine;

/// Values bound per row: id, req_hash, headers, body, created_at.
pub const COLUMNS: usize = 5;

/// Anything a writer may buffer. Only items that expose a `TxRecord`
/// can become rows.
pub trait BatchItem {
    fn tx_record(&self) -> Option<&TxRecord>;
}

impl BatchItem for TxRecord {
    fn tx_record(&self) -> Option<&TxRecord> {
        Some(self)
    }
}

/// A batch item that was skipped while the rest of the batch went on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedRecord {
    Record(TxRecord),
    /// The item was not a `TxRecord`; only its position is known.
    Unrecognized { index: usize },
}

impl SinkLine for FailedRecord {
    fn sink_line(&self) -> String {
        match self {
            FailedRecord::Record(record) => record.sink_line(),
            FailedRecord::Unrecognized { index } => {
                serde_json::json!({ "unrecognized_index": index }).to_string()
            }
        }
    }
}

/// Errors that discard the whole batch.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("empty_request")]
    EmptyRequest,
    #[error(transparent)]
    Hash(#[from] HashError),
}

#[derive(Debug, Default)]
pub struct BuiltValues {
    pub count: usize,
    /// Batch positions of the converted rows, in row order.
    pub rows: Vec<usize>,
    pub args: Vec<Value>,
    pub failed: Vec<FailedRecord>,
}

pub struct ValueBuilder<H, G> {
    hasher: H,
    ids: G,
}

impl<H: Hasher, G: IdGenerator> ValueBuilder<H, G> {
    pub fn new(hasher: H, ids: G) -> Self {
        Self { hasher, ids }
    }

    /// Convert `batch` in order. Per-record problems land in
    /// `BuiltValues::failed`; an empty correlation line or a hashing error
    /// aborts the batch.
    pub fn build<T: BatchItem>(&mut self, batch: &[T]) -> Result<BuiltValues, BuildError> {
        let mut out = BuiltValues {
            count: 0,
            rows: Vec::new(),
            args: Vec::with_capacity(batch.len() * COLUMNS),
            failed: Vec::new(),
        };

        for (index, item) in batch.iter().enumerate() {
            let Some(record) = item.tx_record() else {
                log::error!("batch item {} is not a transaction record", index);
                out.failed.push(FailedRecord::Unrecognized { index });
                continue;
            };

            let id = match self.ids.generate() {
                Ok(id) => id,
                Err(e) => {
                    log::error!("{}", e);
                    out.failed.push(FailedRecord::Record(record.clone()));
                    continue;
                }
            };

            if record.correlation_line.is_empty() {
                return Err(BuildError::EmptyRequest);
            }

            if record.headers.is_empty() {
                log::error!("no headers for {}", record.correlation_line);
                out.failed.push(FailedRecord::Record(record.clone()));
                continue;
            }
            // The column is text; obs-text bytes are kept as replacement chars.
            let headers = String::from_utf8_lossy(&record.headers).into_owned();

            let req_hash = fingerprint(&mut self.hasher, &record.correlation_line)?;

            out.args.push(Value::from(id.to_vec()));
            out.args.push(Value::from(req_hash));
            out.args.push(Value::from(headers));
            out.args.push(Value::from(record.body().map(<[u8]>::to_vec)));
            out.args.push(Value::from(record.created_at()));
            out.rows.push(index);
            out.count += 1;
        }

        Ok(out)
    }
}
