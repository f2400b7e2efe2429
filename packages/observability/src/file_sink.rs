//! JSONL file sink.
//!
//! Each log entry is buffered in full and appended with a single write, so
//! lines from concurrent CLI invocations sharing the file never interleave.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Append-only log file shared by every entry the layer writes.
#[derive(Clone)]
pub struct LogFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFile {
    /// Open `path` for appending, creating missing parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = EntryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EntryWriter {
            file: self.file.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Collects one entry and appends it when dropped.
pub struct EntryWriter {
    file: Arc<Mutex<File>>,
    buf: Vec<u8>,
}

impl Write for EntryWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock();
        file.write_all(&self.buf)?;
        self.buf.clear();
        file.flush()
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Install the JSONL layer for `path`, plus the stderr layer when requested.
pub(crate) fn install(config: &LogConfig, path: &Path) -> io::Result<()> {
    let sink = LogFile::open(path)?;
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let json = JsonLayer::new(config.service_name.clone(), sink, config.redaction)
        .with_filter(filter());
    let stderr = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
            .with_filter(filter())
    });

    // A second init in the same process (tests, embedding) is not an error.
    let _ = tracing_subscriber::registry().with(json).with(stderr).try_init();

    tracing::debug!(log_path = %path.display(), "logging to file");
    Ok(())
}
