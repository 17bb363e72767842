//! Bounded in-app log ring
//!
//! Holds the most recent lifecycle and message lines for the presentation
//! layer. Appends beyond the capacity evict the oldest entry. Every append is
//! mirrored to `tracing` so the same line also reaches the process log.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use tracing::{error, info, warn};

pub const DEFAULT_LOG_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Anything that accepts log lines from the router and publisher
pub trait LogSink {
    fn append(&mut self, level: LogLevel, text: String);

    fn info(&mut self, text: String) {
        self.append(LogLevel::Info, text)
    }

    fn warn(&mut self, text: String) {
        self.append(LogLevel::Warn, text)
    }

    fn error(&mut self, text: String) {
        self.append(LogLevel::Error, text)
    }
}

#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends and returns the stored entry
    pub fn push(&mut self, level: LogLevel, text: String) -> &LogEntry {
        match level {
            LogLevel::Info => info!("{}", text),
            LogLevel::Warn => warn!("{}", text),
            LogLevel::Error => error!("{}", text),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            text,
        });
        // just pushed
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All lines joined oldest first, the way the log page shows them
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl LogSink for EventLog {
    fn append(&mut self, level: LogLevel, text: String) {
        self.push(level, text);
    }
}
