//! Leveled kernel logger.
//!
//! Lines go to an in-memory ring buffer and, when enabled, to stderr. The
//! active level is a global atomic so the filter check is cheap enough for
//! ktrace! call sites on the syscall hot path.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::collections::VecDeque;
use std::io::Write;

use lazy_static::lazy_static;
use spin::Mutex;

/// Number of log lines retained for post-mortem inspection.
const RINGBUF_LINES: usize = 1024;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn.priority());
static STDERR_ECHO: AtomicBool = AtomicBool::new(true);

lazy_static! {
    static ref RINGBUF: Mutex<VecDeque<String>> =
        Mutex::new(VecDeque::with_capacity(RINGBUF_LINES));
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }

    fn from_priority(value: u8) -> Self {
        match value {
            0 => LogLevel::Fatal,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("fatal") {
            Some(LogLevel::Fatal)
        } else if value.eq_ignore_ascii_case("error") {
            Some(LogLevel::Error)
        } else if value.eq_ignore_ascii_case("warn") {
            Some(LogLevel::Warn)
        } else if value.eq_ignore_ascii_case("info") {
            Some(LogLevel::Info)
        } else if value.eq_ignore_ascii_case("debug") {
            Some(LogLevel::Debug)
        } else if value.eq_ignore_ascii_case("trace") {
            Some(LogLevel::Trace)
        } else {
            None
        }
    }
}

/// Initialize the logger. The `KLOG` environment variable overrides the
/// default level (warn).
pub fn init() {
    if let Ok(value) = std::env::var("KLOG") {
        match LogLevel::from_str(&value) {
            Some(level) => set_level(level),
            None => kwarn_raw(&format!("ignoring unknown KLOG level {value:?}")),
        }
    }
}

pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn level() -> LogLevel {
    LogLevel::from_priority(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_stderr_echo(enabled: bool) {
    STDERR_ECHO.store(enabled, Ordering::Relaxed);
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level.priority() > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let line = format!("[{:5}] {}", level.as_str(), args);

    {
        let mut ring = RINGBUF.lock();
        if ring.len() == RINGBUF_LINES {
            ring.pop_front();
        }
        ring.push_back(line.clone());
    }

    if STDERR_ECHO.load(Ordering::Relaxed) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }
}

fn kwarn_raw(msg: &str) {
    log(LogLevel::Warn, format_args!("{msg}"));
}

/// Most recent log lines, oldest first. Inspection hook for diagnostics and
/// tests; not part of the syscall surface.
pub fn recent_lines(max: usize) -> Vec<String> {
    let ring = RINGBUF.lock();
    let skip = ring.len().saturating_sub(max);
    ring.iter().skip(skip).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_roundtrip() {
        for level in [
            LogLevel::Fatal,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            assert_eq!(LogLevel::from_priority(level.priority()), level);
            assert_eq!(LogLevel::from_str(level.as_str()), Some(level));
        }
        assert_eq!(LogLevel::from_str("bogus"), None);
    }

    #[test]
    fn ring_buffer_keeps_recent_lines() {
        set_stderr_echo(false);
        set_level(LogLevel::Info);
        log(LogLevel::Info, format_args!("ring probe line"));
        let lines = recent_lines(8);
        assert!(lines.iter().any(|l| l.contains("ring probe line")));
        set_stderr_echo(true);
    }
}
