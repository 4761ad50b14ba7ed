//! Bounded operator message log.
//!
//! Keeps the last N operational messages for display. Each message is also
//! emitted as a `tracing` event at the matching level.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Default number of messages kept.
pub const DEFAULT_CAPACITY: usize = 10;

/// Severity tag of an operator message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Routine progress.
    Info,
    /// Something the operator should look at.
    Warning,
    /// An operation failed.
    Alert,
    /// An operation completed.
    Success,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Alert => "alert",
            Self::Success => "success",
        };
        f.write_str(s)
    }
}

/// One operator message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity.
    pub level: MessageLevel,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
    /// Text.
    pub text: String,
}

/// Shared ring of the most recent messages.
///
/// Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct MessageLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<Message>>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageLog {
    /// Creates a log keeping at most `capacity` messages (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Maximum number of messages kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a message, discarding the oldest beyond capacity.
    pub fn push(&self, level: MessageLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            MessageLevel::Info | MessageLevel::Success => info!("{text}"),
            MessageLevel::Warning => warn!("{text}"),
            MessageLevel::Alert => error!("{text}"),
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Message {
            level,
            timestamp: Utc::now(),
            text,
        });
    }

    /// Records an info message.
    pub fn info(&self, text: impl Into<String>) {
        self.push(MessageLevel::Info, text);
    }

    /// Records a warning.
    pub fn warning(&self, text: impl Into<String>) {
        self.push(MessageLevel::Warning, text);
    }

    /// Records an alert.
    pub fn alert(&self, text: impl Into<String>) {
        self.push(MessageLevel::Alert, text);
    }

    /// Records a success.
    pub fn success(&self, text: impl Into<String>) {
        self.push(MessageLevel::Success, text);
    }

    /// Messages currently kept, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drops all messages.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_are_discarded() {
        let log = MessageLog::new(3);
        for i in 0..5 {
            log.info(format!("message {i}"));
        }

        let texts: Vec<String> = log.snapshot().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_levels_and_shared_buffer() {
        let log = MessageLog::default();
        let handle = log.clone();
        handle.alert("Check failed");
        log.success("Configuration deployed.");

        let levels: Vec<MessageLevel> = log.snapshot().iter().map(|m| m.level).collect();
        assert_eq!(levels, vec![MessageLevel::Alert, MessageLevel::Success]);
        assert_eq!(log.capacity(), DEFAULT_CAPACITY);

        log.clear();
        assert!(handle.snapshot().is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let log = MessageLog::new(0);
        log.warning("a");
        log.warning("b");
        assert_eq!(log.snapshot().len(), 1);
    }
}
