//! Time and Logging Abstractions
//!
//! Provides an injectable time source and a logging sink for testing and
//! platform integration.

use chrono::{DateTime, Utc};
use self::atomic::AtomicF64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::{error::Result, platform::PlatformSendSync};

/// Time source trait
///
/// Playback timing runs on a monotonic seconds scale; wall-clock time is only
/// used for log timestamps. Injecting the source keeps the sync math testable.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::{Clock, SystemClock};
///
/// let clock = SystemClock::new();
/// let started = clock.monotonic_seconds();
/// ```
pub trait Clock: PlatformSendSync {
    /// Seconds elapsed on a monotonic scale with an arbitrary origin.
    fn monotonic_seconds(&self) -> f64;

    /// Current UTC time.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Monotonic time in whole microseconds.
    fn monotonic_micros(&self) -> i64 {
        (self.monotonic_seconds() * 1_000_000.0) as i64
    }

    /// Monotonic time in whole milliseconds.
    fn monotonic_millis(&self) -> i64 {
        (self.monotonic_seconds() * 1000.0) as i64
    }
}

/// System clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Cloning shares the underlying time value.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicF64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.seconds.store(self.seconds.load() + seconds);
    }
}

impl Clock for ManualClock {
    fn monotonic_seconds(&self) -> f64 {
        self.seconds.load()
    }
}

mod atomic {
    use std::sync::atomic::{AtomicU64, Ordering};

    /// `f64` stored as raw bits in an `AtomicU64`.
    #[derive(Debug, Default)]
    pub struct AtomicF64(AtomicU64);

    impl AtomicF64 {
        pub fn load(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::Acquire))
        }

        pub fn store(&self, value: f64) {
            self.0.store(value.to_bits(), Ordering::Release);
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: HashMap<String, String>,
    /// Name of the span the event was recorded in (e.g. `read_thread`)
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

/// Logger sink trait
///
/// Forwards structured logs from the player threads to a host logging
/// pipeline (Logcat, OSLog, a file, a console).
///
/// Implementations must not log media URLs verbatim; the core already strips
/// query strings before emitting them.
#[async_trait::async_trait]
pub trait LoggerSink: PlatformSendSync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Get the minimum log level that will be processed
    ///
    /// Logs below this level are filtered out before the entry is built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Console logger used by demos and tests.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl ConsoleLogger {
    fn format_entry(entry: &LogEntry) -> String {
        let level = match entry.level {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };

        let mut line = format!(
            "[{}] {} {}: {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            level,
            entry.target,
            entry.message
        );

        if let Some(span) = &entry.span_id {
            line.push_str(&format!(" ({})", span));
        }

        let mut fields: Vec<_> = entry.fields.iter().collect();
        fields.sort();
        for (key, value) in fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{}", Self::format_entry(&entry));
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
