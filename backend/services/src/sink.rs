//! Append-only fallback logs for records that never reached the store.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use txlog_shared::TxRecord;

/// Destination for records that could not be converted or inserted.
///
/// Writes are best-effort: callers log a failed write and move on.
pub trait FailureSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Single-line diagnostic form of a record.
pub trait SinkLine {
    fn sink_line(&self) -> String;
}

impl SinkLine for TxRecord {
    fn sink_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{self:?} ({e})"))
    }
}

/// Write every record to `sink`, logging (never returning) write failures.
pub fn sink_all<'a, R: SinkLine + 'a>(
    sink: &dyn FailureSink,
    records: impl IntoIterator<Item = &'a R>,
) {
    for record in records {
        if let Err(e) = sink.write_line(&record.sink_line()) {
            log::error!("can't log fails: {}", e);
        }
    }
}

/// Failure sink backed by a file opened in append mode.
///
/// Shared by reference (`&File` is `Write`), each line goes out in one
/// `write_all` so concurrent writers do not interleave partial lines.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>, mode: u32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let file = options.open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and sync to disk. The handle itself closes on drop.
    pub fn close(&self) -> io::Result<()> {
        (&self.file).flush()?;
        self.file.sync_all()
    }
}

impl FailureSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        (&self.file).write_all(buf.as_bytes())
    }
}
