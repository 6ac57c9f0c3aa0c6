//! Server-assigned timestamps.
//!
//! A timestamp field written with the store's server-timestamp sentinel is
//! visible to local subscribers before the store has committed it. Until then
//! its value is [`Timestamp::Pending`]; afterwards it is
//! [`Timestamp::Resolved`] and never changes again.
//!
//! In documents the value is encoded as a tagged object:
//! `{"$ts": "resolved", "at": "2026-10-18T09:30:00Z"}` or `{"$ts": "pending"}`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SharedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "$ts", content = "at", rename_all = "snake_case")]
pub enum Timestamp {
    Resolved(DateTime<Utc>),
    Pending,
}

impl Timestamp {
    pub fn resolved(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Resolved(at) => Some(*at),
            Self::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Decode a document field value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, SharedError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SharedError::InvalidTimestamp(e.to_string()))
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Serializing a two-variant enum of plain data cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// Pending values sort after every resolved value: a pending write is always
// newer than anything the store has already committed.
impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Resolved(a), Self::Resolved(b)) => a.cmp(b),
            (Self::Resolved(_), Self::Pending) => Ordering::Less,
            (Self::Pending, Self::Resolved(_)) => Ordering::Greater,
            (Self::Pending, Self::Pending) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Resolved(at)
    }
}
