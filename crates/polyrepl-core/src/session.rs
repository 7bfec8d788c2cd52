//! Durable session records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Language tag a session is bound to.
///
/// The binding is immutable after creation: every execution request is
/// checked against it and rejected on mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    /// Create a language tag.
    #[must_use]
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self(tag.into())
    }

    /// The tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Language {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Kind of a terminal history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Input,
    Output,
    Error,
}

impl EntryKind {
    /// Stable string form, used for persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

/// One durable record in a session's terminal timeline.
///
/// Entries are append-only, except that `content` may be replaced in place
/// through the store's update operation. That single mutation path exists to
/// reconcile streamed output into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Producer-generated identifier (not assigned by the store).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

impl HistoryEntry {
    /// Create a new entry with a fresh id and the current timestamp.
    #[must_use]
    pub fn new<S: Into<String>>(kind: EntryKind, content: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            created_at: unix_now(),
        }
    }
}

/// Serialized execution environment for a session.
///
/// The payload is opaque to the store; only the adapter that produced it
/// can interpret the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Language of the adapter that produced the payload.
    pub language: Language,
    /// Encoded context payload.
    pub serialized_data: String,
    /// Last update timestamp (Unix epoch seconds).
    pub last_updated: i64,
}

/// Persisted session data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Bound language, immutable after creation.
    pub language: Language,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last access timestamp.
    pub last_accessed: i64,
    /// Number of executions run against this session.
    pub execution_count: u64,
    /// Ordered terminal history.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Serialized execution environment, if any.
    pub environment: Option<EnvironmentState>,
}

/// Current time as Unix epoch seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
