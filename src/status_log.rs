//! Timestamped user-facing notices.
//!
//! Every message is also forwarded to the `log` facade at info level. Only the
//! most recent lines are kept.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;

/// One notice line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// Lines kept by [`StatusLog::new`].
pub const DEFAULT_STATUS_CAPACITY: usize = 200;

#[derive(Debug)]
struct Buffer {
    lines: VecDeque<StatusLine>,
    capacity: usize,
}

/// Shared ring of notices. Clones share the same buffer; once full, the oldest
/// line is dropped for each new one.
#[derive(Debug, Clone)]
pub struct StatusLog {
    buffer: Arc<Mutex<Buffer>>,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STATUS_CAPACITY)
    }
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log holding at most `capacity` lines (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(Buffer {
                lines: VecDeque::with_capacity(capacity.min(DEFAULT_STATUS_CAPACITY)),
                capacity,
            })),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let mut buffer = self.lock();
        if buffer.lines.len() == buffer.capacity {
            buffer.lines.pop_front();
        }
        buffer.lines.push_back(StatusLine {
            timestamp: Utc::now(),
            message,
        });
    }

    pub fn lines(&self) -> Vec<StatusLine> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Messages without timestamps, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .lines
            .iter()
            .map(|line| line.message.clone())
            .collect()
    }

    /// Number of messages containing `fragment`.
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.lock()
            .lines
            .iter()
            .filter(|line| line.message.contains(fragment))
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
