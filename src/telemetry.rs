//! Decision log: one JSON line per handled request, appended to `LOG_FILE`
//! through a size-rotating writer.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::pipeline::{PipelineState, StageTiming};

pub const SCHEMA_VERSION: u32 = 1;

/// Size-based rotating writer. Backups are `<path>.1` .. `<path>.<keep>`;
/// the newest backup is optionally gzipped.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(
        path: &str,
        max_bytes: Option<u64>,
        keep: usize,
        compress: bool,
    ) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes,
            keep,
            compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.size().is_some_and(|len| len >= limit) {
                self.rotate();
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) {
        if self.keep > 0 {
            for idx in (1..self.keep).rev() {
                let from = self.backup(idx);
                if from.exists() {
                    let _ = fs::rename(&from, self.backup(idx + 1));
                }
            }
            let _ = fs::rename(&self.path, self.backup(1));
            if self.compress {
                self.gzip_newest_backup();
            }
        }
        match fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            Ok(f) => self.file = f,
            Err(e) => tracing::warn!(error = %e, "failed to reopen decision log after rotation"),
        }
    }

    fn gzip_newest_backup(&self) {
        let rotated = self.backup(1);
        let Ok(data) = fs::read(&rotated) else {
            return;
        };
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        if gz.write_all(&data).is_err() {
            return;
        }
        if let Ok(buf) = gz.finish() {
            let mut gz_path = rotated.clone().into_os_string();
            gz_path.push(".gz");
            if fs::write(PathBuf::from(gz_path), buf).is_ok() {
                let _ = fs::remove_file(&rotated);
            }
        }
    }
}

/// One decision-log line. Never carries the raw message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub schema_version: u32,
    pub ts: String,
    pub actor_id: i64,
    pub path: String,
    pub intent: Option<String>,
    pub blocked: bool,
    pub blocked_by: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stage_timings: Vec<StageTiming>,
}

impl DecisionRecord {
    pub fn new(actor_id: i64, path: &str, latency_ms: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            actor_id,
            path: path.to_string(),
            intent: None,
            blocked: false,
            blocked_by: None,
            error: None,
            latency_ms,
            stage_timings: Vec::new(),
        }
    }

    /// Record for a conversational run. `error` carries the error kind, not
    /// the user-facing text.
    pub fn from_run(state: &PipelineState, path: &str, latency_ms: u64) -> Self {
        Self {
            intent: Some(state.intent.as_str().to_string()),
            blocked: state.blocked,
            blocked_by: state.blocked_by.map(|l| l.as_str().to_string()),
            error: state.error_kind.map(|k| k.as_str().to_string()),
            stage_timings: state.timings.clone(),
            ..Self::new(state.context.actor_id, path, latency_ms)
        }
    }
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    sample_n: Option<u64>,
    sample_counter: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
    file_size_bytes: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool, sample_n: Option<u64>) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            sample_n: sample_n.filter(|n| *n > 0),
            sample_counter: Arc::new(AtomicU64::new(0)),
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
            file_size_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false, None)
    }

    pub fn emit(&self, record: &DecisionRecord) {
        let wrote = self.write(record);
        if (wrote || self.writer.is_none()) && self.should_log_stdout() {
            tracing::info!(
                target: "decision",
                actor_id = record.actor_id,
                path = %record.path,
                intent = ?record.intent,
                blocked = record.blocked,
                blocked_by = ?record.blocked_by,
                error = ?record.error,
                latency_ms = record.latency_ms,
                "decision"
            );
        }
    }

    fn write(&self, record: &DecisionRecord) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize decision record");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        let Ok(mut guard) = writer.lock() else {
            self.write_errors_total.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match guard.write_line(&line) {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
                if let Some(sz) = guard.size() {
                    self.file_size_bytes.store(sz, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write decision line");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn should_log_stdout(&self) -> bool {
        if !self.log_stdout {
            return false;
        }
        match self.sample_n {
            Some(n) => self.sample_counter.fetch_add(1, Ordering::Relaxed) % n == 0,
            None => true,
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes.load(Ordering::Relaxed)
    }
}
