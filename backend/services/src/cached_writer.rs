//! In-memory buffered writer: request tasks push, one background task
//! batches and inserts.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseConnection};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::sink::{FailureSink, SinkLine, sink_all};
use crate::statement::BuildStatement;
use crate::values::BatchItem;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BATCH_SIZE: usize = 500;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Push side of a background writer.
pub trait CachedWriter<T>: Send + Sync {
    /// Enqueue without waiting on storage.
    fn push(&self, record: T);
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub retries: u32,
    pub interval: Duration,
    pub batch_size: usize,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

pub type StopSignal = watch::Receiver<bool>;

pub struct StopHandle(watch::Sender<bool>);

impl StopHandle {
    pub fn fire(&self) {
        self.0.send_replace(true);
    }
}

pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), rx)
}

#[derive(Debug, Error)]
#[error("unknown shutdown mode {0:?} (expected \"legacy\" or \"drain\")")]
pub struct UnknownShutdownMode(String);

/// How the writer is stopped at process shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Fire the stop signal and return at once; the final flush may be cut
    /// short by process exit.
    Legacy,
    /// Fire the stop signal and wait for the final flush.
    #[default]
    Drain,
}

impl FromStr for ShutdownMode {
    type Err = UnknownShutdownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(ShutdownMode::Legacy),
            "drain" => Ok(ShutdownMode::Drain),
            _ => Err(UnknownShutdownMode(s.to_string())),
        }
    }
}

pub struct MemCachedWriter<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for MemCachedWriter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MemCachedWriter<T>
where
    T: BatchItem + SinkLine + Send + Sync + 'static,
{
    /// Returns the push handle and the not yet started flush loop.
    pub fn new<B>(
        db: DatabaseConnection,
        builder: B,
        settings: WriterSettings,
        failed: Arc<dyn FailureSink>,
    ) -> (Self, FlushLoop<T, B>)
    where
        B: BuildStatement<T> + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let flush = FlushLoop {
            rx,
            builder,
            db,
            settings,
            failed,
            buffer: Vec::new(),
        };
        (Self { tx }, flush)
    }
}

impl<T: Send> CachedWriter<T> for MemCachedWriter<T> {
    fn push(&self, record: T) {
        if self.tx.send(record).is_err() {
            log::debug!("writer stopped, record dropped");
        }
    }
}

pub struct FlushLoop<T, B> {
    rx: mpsc::UnboundedReceiver<T>,
    builder: B,
    db: DatabaseConnection,
    settings: WriterSettings,
    failed: Arc<dyn FailureSink>,
    buffer: Vec<T>,
}

impl<T, B> FlushLoop<T, B>
where
    T: BatchItem + SinkLine + Send + Sync + 'static,
    B: BuildStatement<T> + 'static,
{
    /// Spawn the flush task; it exits after a final flush once `stop` fires.
    pub fn start(self, stop: StopSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    /// `start` with a fresh stop signal bundled into the returned task.
    pub fn spawn(self) -> WriterTask {
        let (stop, signal) = stop_signal();
        let handle = self.start(signal);
        WriterTask { stop, handle }
    }

    async fn run(mut self, mut stop: StopSignal) {
        log::info!(
            "writer started: batch size {}, interval {:?}, retries {}",
            self.settings.batch_size,
            self.settings.interval,
            self.settings.retries
        );
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                received = self.rx.recv() => match received {
                    Some(record) => {
                        self.buffer.push(record);
                        if self.buffer.len() >= self.settings.batch_size {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush().await,
            }
        }

        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            self.buffer.push(record);
        }
        self.flush().await;
        log::info!("writer stopped");
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.buffer);
        for batch in pending.chunks(self.settings.batch_size.max(1)) {
            self.write_batch(batch).await;
        }
    }

    async fn write_batch(&mut self, batch: &[T]) {
        let Some(prepared) = self.builder.build(batch) else {
            return;
        };

        let attempts = self.settings.retries.max(1);
        for attempt in 1..=attempts {
            match self.db.execute(prepared.statement.clone()).await {
                Ok(res) => {
                    log::debug!("inserted {} rows", res.rows_affected());
                    return;
                }
                Err(e) => {
                    log::warn!("insert attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.backoff * attempt).await;
                    }
                }
            }
        }

        log::error!(
            "dropping {} records after {} attempts",
            prepared.rows.len(),
            attempts
        );
        sink_all(
            self.failed.as_ref(),
            prepared.rows.iter().filter_map(|&index| batch.get(index)),
        );
    }
}

/// A running flush loop and the signal that stops it.
pub struct WriterTask {
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl WriterTask {
    pub async fn stop(self, mode: ShutdownMode) -> Result<(), JoinError> {
        self.stop.fire();
        match mode {
            ShutdownMode::Legacy => {
                log::info!("writer stop signalled, not waiting for final flush");
                Ok(())
            }
            ShutdownMode::Drain => self.handle.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ConnConfig, create_connection};
    use crate::hasher::XxHasher;
    use crate::identity::UuidGenerator;
    use crate::schema::{Dialect, provision};
    use crate::sink::testing::MemorySink;
    use crate::statement::{SqlBuilder, TableShape};
    use crate::values::testing::{FlakyIds, record};
    use sea_orm::{DbBackend, Statement};
    use txlog_shared::TxRecord;

    type Builder = SqlBuilder<XxHasher, UuidGenerator>;

    struct Harness {
        _dir: tempfile::TempDir,
        db: DatabaseConnection,
        db_failed: Arc<MemorySink>,
    }

    async fn harness(provisioned: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("w.db").display());
        let db = create_connection(&ConnConfig::new("sqlite3", dsn)).await.unwrap();
        if provisioned {
            provision(&db, Dialect::Sqlite).await.unwrap();
        }
        Harness {
            _dir: dir,
            db,
            db_failed: Arc::new(MemorySink::default()),
        }
    }

    fn writer(
        h: &Harness,
        settings: WriterSettings,
    ) -> (MemCachedWriter<TxRecord>, FlushLoop<TxRecord, Builder>) {
        let builder = SqlBuilder::new(
            XxHasher::default(),
            UuidGenerator,
            TableShape::default(),
            DbBackend::Sqlite,
            Arc::new(MemorySink::default()),
        );
        MemCachedWriter::new(h.db.clone(), builder, settings, h.db_failed.clone())
    }

    fn slow(batch_size: usize) -> WriterSettings {
        WriterSettings {
            interval: Duration::from_secs(3600),
            batch_size,
            ..WriterSettings::default()
        }
    }

    async fn rows(db: &DatabaseConnection) -> i64 {
        let row = db
            .query_one(Statement::from_string(DbBackend::Sqlite, "SELECT COUNT(*) FROM tx_log"))
            .await
            .unwrap()
            .unwrap();
        row.try_get_by_index(0).unwrap()
    }

    async fn wait_for_rows(db: &DatabaseConnection, want: i64) {
        for _ in 0..200 {
            if rows(db).await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {want} rows, found {}", rows(db).await);
    }

    #[tokio::test]
    async fn drain_stop_flushes_buffered_records() {
        let h = harness(true).await;
        let (w, flush) = writer(&h, slow(500));
        let task = flush.spawn();

        for i in 0..3 {
            w.push(record(&format!("GET http://localhost/{i}"), ""));
        }
        task.stop(ShutdownMode::Drain).await.unwrap();

        assert_eq!(rows(&h.db).await, 3);
        w.push(record("GET http://localhost/late", ""));
    }

    #[tokio::test]
    async fn full_buffer_flushes_early() {
        let h = harness(true).await;
        let (w, flush) = writer(&h, slow(2));
        let task = flush.spawn();

        w.push(record("GET http://localhost/a", ""));
        w.push(record("GET http://localhost/b", ""));
        wait_for_rows(&h.db, 2).await;

        task.stop(ShutdownMode::Drain).await.unwrap();
    }

    #[tokio::test]
    async fn tick_flushes_partial_batch() {
        let h = harness(true).await;
        let settings = WriterSettings {
            interval: Duration::from_millis(20),
            ..WriterSettings::default()
        };
        let (w, flush) = writer(&h, settings);
        let (stop, signal) = stop_signal();
        let handle = flush.start(signal);

        w.push(record("GET http://localhost/tick", ""));
        wait_for_rows(&h.db, 1).await;

        stop.fire();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_db_sink() {
        let h = harness(false).await;
        let settings = WriterSettings {
            retries: 2,
            backoff: Duration::from_millis(1),
            ..slow(500)
        };
        let (w, flush) = writer(&h, settings);
        let task = flush.spawn();

        w.push(record("GET http://localhost/a", ""));
        w.push(record("GET http://localhost/b", ""));
        task.stop(ShutdownMode::Drain).await.unwrap();

        let lines = h.db_failed.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("http://localhost/b"));
    }

    #[tokio::test]
    async fn each_record_lands_in_one_failure_log() {
        let h = harness(false).await;
        let req_failed = Arc::new(MemorySink::default());
        let builder = SqlBuilder::new(
            XxHasher::default(),
            FlakyIds { calls: 0, fail_at: 0 },
            TableShape::default(),
            DbBackend::Sqlite,
            req_failed.clone(),
        );
        let settings = WriterSettings {
            retries: 1,
            ..slow(500)
        };
        let (w, flush) = MemCachedWriter::<TxRecord>::new(
            h.db.clone(),
            builder,
            settings,
            h.db_failed.clone(),
        );
        let task = flush.spawn();

        w.push(record("GET http://localhost/a", ""));
        w.push(record("GET http://localhost/b", ""));
        task.stop(ShutdownMode::Drain).await.unwrap();

        let conversion = req_failed.lines();
        let insertion = h.db_failed.lines();
        assert_eq!(conversion.len(), 1);
        assert!(conversion[0].contains("http://localhost/a"));
        assert_eq!(insertion.len(), 1);
        assert!(insertion[0].contains("http://localhost/b"));
    }

    #[tokio::test]
    async fn legacy_stop_does_not_wait() {
        let h = harness(true).await;
        let (w, flush) = writer(&h, slow(500));
        let task = flush.spawn();

        w.push(record("GET http://localhost/a", ""));
        task.stop(ShutdownMode::Legacy).await.unwrap();

        // The detached task still completes its final flush.
        wait_for_rows(&h.db, 1).await;
    }

    #[test]
    fn shutdown_mode_parses() {
        assert_eq!("drain".parse::<ShutdownMode>().unwrap(), ShutdownMode::Drain);
        assert_eq!(" Legacy ".parse::<ShutdownMode>().unwrap(), ShutdownMode::Legacy);
        assert!("later".parse::<ShutdownMode>().is_err());
        assert_eq!(ShutdownMode::default(), ShutdownMode::Drain);
    }
}
