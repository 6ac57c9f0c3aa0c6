//! Collection queries: equality / containment filters and one ascending
//! order-by field.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use duet_shared::Timestamp;

use crate::models::{Document, DocumentId};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == value`
    FieldEq { field: String, value: Value },
    /// `field` is an array holding `value`.
    ArrayContains { field: String, value: Value },
    /// The document id equals the given id.
    IdEq(DocumentId),
}

impl Filter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::FieldEq { field, value } => document.get(field) == Some(value),
            Filter::ArrayContains { field, value } => document
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |items| items.contains(value)),
            Filter::IdEq(id) => &document.id == id,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::FieldEq { field, value } => write!(f, "{field} == {value}"),
            Filter::ArrayContains { field, value } => write!(f, "{field} contains {value}"),
            Filter::IdEq(id) => write!(f, "id == {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::FieldEq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.filters.push(Filter::IdEq(id.into()));
        self
    }

    /// Order ascending by `field`. Documents without the field drop out of
    /// the result.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        let has_order_field = self
            .order_by
            .as_deref()
            .map_or(true, |field| document.get(field).is_some());
        has_order_field && self.filters.iter().all(|f| f.matches(document))
    }

    /// Filter and order `documents`, which must be in store insertion order.
    /// The sort is stable, so equal keys keep insertion order.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut matched: Vec<Document> =
            documents.into_iter().filter(|d| self.matches(d)).collect();

        if let Some(field) = self.order_by.as_deref() {
            matched.sort_by_cached_key(|d| d.get(field).map(SortKey::of));
        }
        matched
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        for (i, filter) in self.filters.iter().enumerate() {
            let joiner = if i == 0 { " where " } else { " and " };
            write!(f, "{joiner}{filter}")?;
        }
        if let Some(field) = &self.order_by {
            write!(f, " order by {field}")?;
        }
        Ok(())
    }
}

/// Ordering key of a field value. Kinds rank timestamps first (resolved,
/// then pending), then booleans, numbers, strings, and anything else last.
/// Values of the last kind are all equal, so the stable sort keeps their
/// insertion order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Timestamp(Timestamp),
    Bool(bool),
    Number(Number),
    Text(String),
    Other,
}

impl SortKey {
    fn of(value: &Value) -> Self {
        if let Ok(ts) = Timestamp::from_value(value) {
            return Self::Timestamp(ts);
        }
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(Number(n.as_f64().unwrap_or_default())),
            Value::String(s) => Self::Text(s.clone()),
            _ => Self::Other,
        }
    }
}

#[derive(Debug)]
struct Number(f64);

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
