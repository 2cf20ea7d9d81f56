//! Session model: session codes, the persisted record, and the store trait.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, SceneRelayError};

/// Number of digits in a session code.
pub const CODE_LEN: usize = 4;

/// Reserved code used for local testing; never subscribed to or written.
pub const DEFAULT_CODE: &str = "1111";

/// A 4-digit numeric session code. Leading zeros are significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Validate a code typed in by a human or read off the wire.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() == CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(SceneRelayError::InvalidCode(raw.to_string()))
        }
    }

    /// Draw a code with each digit independently uniform over 0-9.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CODE_LEN)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = SceneRelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = SceneRelayError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

/// The shared record binding an editor session to a display session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub code: SessionCode,
    /// Last (re)allocation time.
    pub timestamp: DateTime<Utc>,
    /// Composed scene document. Absent or empty means nothing published yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Set once an editor has claimed this code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked: Option<bool>,
}

impl SessionRecord {
    pub fn new(code: SessionCode, timestamp: DateTime<Utc>) -> Self {
        Self {
            code,
            timestamp,
            html: None,
            linked: None,
        }
    }

    /// Older than `threshold` at `now`, and therefore free for reuse.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.timestamp > threshold
    }

    /// The published document, if non-empty.
    pub fn published_html(&self) -> Option<&str> {
        self.html.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_linked(&self) -> bool {
        self.linked.unwrap_or(false)
    }

    /// Apply a partial write. `html` is replaced wholesale, never merged.
    pub fn apply(&mut self, patch: RecordPatch) {
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(html) = patch.html {
            self.html = Some(html);
        }
        if let Some(linked) = patch.linked {
            self.linked = Some(linked);
        }
    }
}

/// Fields to overwrite on an existing record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub timestamp: Option<DateTime<Utc>>,
    pub html: Option<String>,
    pub linked: Option<bool>,
}

impl RecordPatch {
    pub fn linked() -> Self {
        Self {
            linked: Some(true),
            ..Self::default()
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }
}

/// Live view of one record. Holds the latest state; `None` while absent.
pub type RecordWatch = watch::Receiver<Option<SessionRecord>>;

/// Key-value document store holding one record per session code.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Point read.
    async fn get(&self, code: &SessionCode) -> Result<Option<SessionRecord>>;

    /// Atomic create-if-absent. Returns `false` if the code already exists.
    async fn create(&self, record: SessionRecord) -> Result<bool>;

    /// Refresh the timestamp only if it still equals `expected`.
    /// Returns `false` if the record changed or vanished in between.
    async fn touch(
        &self,
        code: &SessionCode,
        expected: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Overwrite fields on an existing record. Returns `false` if absent.
    async fn set(&self, code: &SessionCode, patch: RecordPatch) -> Result<bool>;

    /// Subscribe to the latest state of a record until the receiver is dropped.
    async fn subscribe(&self, code: &SessionCode) -> Result<RecordWatch>;

    /// Server time source for record timestamps.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
