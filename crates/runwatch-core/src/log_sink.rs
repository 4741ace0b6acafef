//! Per-run log file persistence.
//!
//! The UI loop hands every received record to a [`LogSink`] without waiting;
//! a dedicated writer task drains the sink's own bounded channel. When the
//! channel is full the record is dropped and counted, so disk stalls never
//! reach the UI.

use crate::feed::strip_ansi;
use crate::record::LineRecord;
use chrono::{DateTime, Local, SecondsFormat};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const LOG_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LineRecord>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSummary {
    pub path: PathBuf,
    pub written: u64,
    pub dropped: u64,
}

impl LogSink {
    /// Never waits. Returns false when the record was not accepted.
    pub fn record(&self, record: LineRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(dropped, "run_log_backlogged");
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The writer finishes once every clone has been closed.
    pub fn close(self) {
        drop(self);
    }
}

pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("run-{}.log", started.format("%Y%m%d-%H%M%S"))
}

pub fn format_log_line(record: &LineRecord) -> String {
    format!(
        "[{}] {}: {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.level(),
        strip_ansi(&record.text)
    )
}

/// Creates `dir` if needed and starts the writer for one run.
pub async fn open_run_log(
    dir: &Path,
    started: DateTime<Local>,
) -> io::Result<(LogSink, JoinHandle<io::Result<LogSummary>>)> {
    open_run_log_with_capacity(dir, started, LOG_CHANNEL_CAPACITY).await
}

pub async fn open_run_log_with_capacity(
    dir: &Path,
    started: DateTime<Local>,
    capacity: usize,
) -> io::Result<(LogSink, JoinHandle<io::Result<LogSummary>>)> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(log_file_name(started));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    info!(path = %path.display(), "run_log_opened");

    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let sink = LogSink {
        tx,
        dropped: dropped.clone(),
    };
    let writer = tokio::spawn(write_records(BufWriter::new(file), rx, path, dropped));
    Ok((sink, writer))
}

async fn write_records(
    mut out: BufWriter<fs::File>,
    mut rx: mpsc::Receiver<LineRecord>,
    path: PathBuf,
    dropped: Arc<AtomicU64>,
) -> io::Result<LogSummary> {
    let mut written = 0u64;
    while let Some(record) = rx.recv().await {
        write_line(&mut out, &record).await?;
        written += 1;
        while let Ok(record) = rx.try_recv() {
            write_line(&mut out, &record).await?;
            written += 1;
        }
        out.flush().await?;
    }
    out.flush().await?;

    let summary = LogSummary {
        path,
        written,
        dropped: dropped.load(Ordering::Relaxed),
    };
    debug!(
        path = %summary.path.display(),
        written = summary.written,
        dropped = summary.dropped,
        "run_log_closed"
    );
    Ok(summary)
}

async fn write_line(out: &mut BufWriter<fs::File>, record: &LineRecord) -> io::Result<()> {
    let mut line = format_log_line(record);
    line.push('\n');
    out.write_all(line.as_bytes()).await
}
