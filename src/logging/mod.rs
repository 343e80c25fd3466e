//! Logging and output control
//!
//! This module provides the [`Logger`] that every component receives explicitly.
//! Nothing looks a logger up from ambient state; whoever builds a component hands
//! it the logger it should report through. Messages go to a [`LogSink`], which is
//! the console by default and a [`MemorySink`] when output must be captured.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Verbose,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "debug",
            Level::Verbose => "verbose",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        f.write_str(name)
    }
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn write(&self, level: Level, message: &str);
}

/// Writes records to stderr; stdout carries command results only
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    fn render(level: Level, message: &str) -> String {
        match level {
            Level::Debug => format!("🐛 DEBUG: {}", message),
            Level::Verbose => format!("📝 {}", message),
            Level::Info => format!("ℹ️  {}", message),
            Level::Warning => format!("⚠️  WARNING: {}", message),
            Level::Error => format!("❌ ERROR: {}", message),
        }
    }
}

impl LogSink for ConsoleSink {
    fn write(&self, level: Level, message: &str) {
        eprintln!("{}", Self::render(level, message));
    }
}

/// A captured log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub message: String,
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages recorded at the given level, in arrival order
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| record.level == level)
            .map(|record| record.message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: Level, message: &str) {
        let record = Record {
            level,
            message: message.to_string(),
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Logger responsible for all user-visible diagnostics
#[derive(Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .finish()
    }
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            sink: Arc::new(ConsoleSink),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            sink: Arc::new(ConsoleSink),
        }
    }

    /// Route records to a custom sink
    pub fn with_sink(verbose: bool, sink: Arc<dyn LogSink>) -> Self {
        Self {
            verbose,
            quiet: false,
            sink,
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.sink.write(Level::Debug, message);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.sink.write(Level::Verbose, message);
        }
    }

    /// Information message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.sink.write(Level::Info, message);
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        if !self.quiet {
            self.sink.write(Level::Warning, message);
        }
    }

    /// Error message, never suppressed
    pub fn error(&self, message: &str) {
        self.sink.write(Level::Error, message);
    }
}
