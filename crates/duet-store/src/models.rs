//! Records as the store sees them: opaque ids plus named JSON fields.
//!
//! The store knows nothing about users, conversations or messages. Domain
//! decoding happens on the client side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use duet_shared::Timestamp;

// ---------------------------------------------------------------------------
// DocumentId
// ---------------------------------------------------------------------------

/// Stable per-record identifier, unique within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// A fresh store-assigned identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// One stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// `None` when the field is absent or is not a timestamp.
    pub fn get_timestamp(&self, field: &str) -> Option<Timestamp> {
        self.fields
            .get(field)
            .and_then(|v| Timestamp::from_value(v).ok())
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// A field value in a write request.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the commit time when the store applies the write.
    ServerTimestamp,
}

/// Named fields of an append or merge-update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteFields {
    fields: BTreeMap<String, FieldValue>,
}

impl WriteFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), FieldValue::Value(value.into()));
        self
    }

    pub fn server_timestamp(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldValue::ServerTimestamp);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Materialise the write. Server timestamps become `Resolved(at)` when a
    /// commit time is given and `Pending` otherwise.
    pub fn resolve(&self, commit_time: Option<DateTime<Utc>>) -> Map<String, Value> {
        let stamp = match commit_time {
            Some(at) => Timestamp::Resolved(at),
            None => Timestamp::Pending,
        };

        self.fields
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    FieldValue::Value(v) => v.clone(),
                    FieldValue::ServerTimestamp => stamp.to_value(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ResultSet
// ---------------------------------------------------------------------------

/// The full set of documents matching a query at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub documents: Vec<Document>,
    /// True when at least one document reflects a write the store has not
    /// committed yet.
    pub has_pending_writes: bool,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }
}
