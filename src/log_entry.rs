//! Log entries and the cursor used to page through a function's log.
//!
//! The remote log is append-only and ordered. A [`LogCursor`] marks a position
//! in it; every page the server returns comes with enough information to build
//! the cursor for the next request.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single line emitted by a running function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp assigned by the service
    pub timestamp: DateTime<Utc>,

    /// Log message content
    pub message: String,
}

impl LogEntry {
    /// Create a new log entry with the given parameters.
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}]: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// One response from the log endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    /// Entries in the order assigned by the service
    pub entries: Vec<LogEntry>,

    /// Pagination token for the next request, if the service sent one
    pub next_token: Option<String>,
}

impl LogPage {
    pub fn new(entries: Vec<LogEntry>, next_token: Option<String>) -> Self {
        Self {
            entries,
            next_token,
        }
    }

    /// Number of entries in the page.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the service advertised further pages.
    pub fn has_more(&self) -> bool {
        self.next_token.is_some()
    }
}

/// Resumable position in a function's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCursor {
    /// Only entries after this instant are requested
    pub start_after: Option<DateTime<Utc>>,

    /// Opaque pagination token from the previous page
    pub token: Option<String>,
}

impl LogCursor {
    /// Cursor with no position; the service returns its most recent window.
    pub fn latest() -> Self {
        Self::default()
    }

    /// Cursor starting after `instant`.
    pub fn since(instant: DateTime<Utc>) -> Self {
        Self {
            start_after: Some(instant),
            token: None,
        }
    }

    /// Cursor to use after `page` was delivered.
    ///
    /// The token is replaced by the one the service sent. `start_after` moves
    /// to the last delivered entry and stays put on an empty page.
    ///
    /// When the page carries no token, an entry sharing the last delivered
    /// timestamp but not yet visible to the service is skipped by the next
    /// request, since the service filters strictly after `start_after`.
    pub fn advance(&self, page: &LogPage) -> Self {
        Self {
            start_after: page
                .entries
                .last()
                .map(|entry| entry.timestamp)
                .or(self.start_after),
            token: page.next_token.clone(),
        }
    }

    /// Query parameters for a request at this position.
    ///
    /// `startAfter` keeps the full sub-second precision of the cursor.
    pub fn query_pairs(&self, follow: bool) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("follow", follow.to_string())];
        if let Some(start_after) = self.start_after {
            pairs.push((
                "startAfter",
                start_after.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ));
        }
        if let Some(token) = &self.token {
            pairs.push(("token", token.clone()));
        }
        pairs
    }
}
