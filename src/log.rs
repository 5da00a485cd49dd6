// log.rs — pluggable log sink.
//
// A trait every component can be handed, instead of calling free functions
// against module-level statics.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Something the core can send loggable diagnostics to. The core never
/// assumes a particular sink is installed; `Config::log_sink` defaults to
/// `NullLogSink` and the host is free to supply its own.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Discards everything. Default for tests and for hosts that don't care.
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Accumulates lines in memory and rewrites a log file on every write. Kept
/// simple on purpose: this is a diagnostic aid, not a high-throughput
/// logging pipeline.
pub struct FileLogSink {
    path: PathBuf,
    lines: Mutex<Vec<String>>,
}

impl FileLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    fn flush(&self, lines: &[String]) -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        for l in lines {
            writeln!(f, "{}", l)?;
        }
        Ok(())
    }
}

impl LogSink for FileLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut v) = self.lines.lock() {
            v.push(format!("[{}] {}", level.tag(), message));
            let _ = self.flush(&v);
        }
    }
}

/// Convenience macro-free helpers used throughout the core so call sites
/// read like `log_warn(&sink, "...")` rather than repeating `LogLevel::Warn`.
pub fn log_debug(sink: &dyn LogSink, msg: impl AsRef<str>) {
    sink.log(LogLevel::Debug, msg.as_ref());
}
pub fn log_info(sink: &dyn LogSink, msg: impl AsRef<str>) {
    sink.log(LogLevel::Info, msg.as_ref());
}
pub fn log_warn(sink: &dyn LogSink, msg: impl AsRef<str>) {
    sink.log(LogLevel::Warn, msg.as_ref());
}
pub fn log_error(sink: &dyn LogSink, msg: impl AsRef<str>) {
    sink.log(LogLevel::Error, msg.as_ref());
}
