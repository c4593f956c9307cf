//! Document store port
//!
//! Hexagonal architecture: the access layer and the statistics engine only
//! talk to [`DocumentStore`]. Counter mutation goes exclusively through
//! [`WriteOp::Increment`] / [`WriteOp::UpsertIncrement`], never through
//! full-document overwrites.

mod memory;

pub use memory::InMemoryStore;

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::query::Query;

/// A stored JSON document. Stored documents always carry an `id` field.
pub type Document = Map<String, Value>;

/// Field holding a document's id
pub const ID_FIELD: &str = "id";

/// Numeric delta for an atomic increment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    Int(i64),
    Float(f64),
    /// Exact money delta; stored as a decimal string
    Decimal(Decimal),
}

impl Delta {
    /// Add the delta to an existing field value
    pub fn apply(self, current: Option<&Value>, path: &str) -> StoreResult<Value> {
        let non_numeric = |other: &Value| StoreError::InvalidPath {
            path: path.to_string(),
            reason: format!("cannot increment non-numeric value {other}"),
        };

        if let Delta::Decimal(d) = self {
            let base = match current {
                None | Some(Value::Null) => Decimal::ZERO,
                Some(other) => value_to_decimal(other).ok_or_else(|| non_numeric(other))?,
            };
            return Ok(Value::String((base + d).to_string()));
        }

        match current {
            None | Some(Value::Null) => Ok(self.into_value()),
            Some(Value::Number(n)) => match (n.as_i64(), self) {
                (Some(i), Delta::Int(d)) => Ok(Value::from(i.saturating_add(d))),
                _ => {
                    let base = n.as_f64().unwrap_or(0.0);
                    Ok(Value::from(base + self.as_f64()))
                }
            },
            Some(other) => Err(non_numeric(other)),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Delta::Int(i) => i as f64,
            Delta::Float(f) => f,
            Delta::Decimal(d) => d.to_f64().unwrap_or(0.0),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Delta::Int(i) => Delta::Int(-i),
            Delta::Float(f) => Delta::Float(-f),
            Delta::Decimal(d) => Delta::Decimal(-d),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Delta::Int(i) => Value::from(i),
            Delta::Float(f) => Value::from(f),
            Delta::Decimal(d) => Value::String(d.to_string()),
        }
    }
}

impl From<i64> for Delta {
    fn from(v: i64) -> Self {
        Delta::Int(v)
    }
}

impl From<f64> for Delta {
    fn from(v: f64) -> Self {
        Delta::Float(v)
    }
}

impl From<Decimal> for Delta {
    fn from(v: Decimal) -> Self {
        Delta::Decimal(v)
    }
}

/// Exact decimal from a JSON number or decimal string.
///
/// Numbers are read from their literal text, so `0.1` is exactly one tenth.
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// One mutation inside an all-or-nothing batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert unless a document with this id exists; existing documents are untouched
    CreateIfAbsent {
        collection: String,
        id: String,
        data: Document,
    },
    /// Merge dotted-path fields into an existing document
    Update {
        collection: String,
        id: String,
        fields: Document,
    },
    /// Atomic adds against an existing document
    Increment {
        collection: String,
        id: String,
        increments: Vec<(String, Delta)>,
    },
    /// Merge-upsert: create from `seed` when absent, then apply the adds
    UpsertIncrement {
        collection: String,
        id: String,
        seed: Document,
        increments: Vec<(String, Delta)>,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            Self::CreateIfAbsent { collection, .. }
            | Self::Update { collection, .. }
            | Self::Increment { collection, .. }
            | Self::UpsertIncrement { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::CreateIfAbsent { id, .. }
            | Self::Update { id, .. }
            | Self::Increment { id, .. }
            | Self::UpsertIncrement { id, .. } => id,
        }
    }
}

/// Generic document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents in `collection` matching the query
    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Document by id
    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Insert with a store-generated id; returns the stored document
    async fn create(&self, collection: &str, data: Document) -> StoreResult<Document>;

    /// Insert with a caller-chosen id; [`StoreError::AlreadyExists`] if taken
    async fn create_with_id(&self, collection: &str, id: &str, data: Document)
        -> StoreResult<Document>;

    /// Merge dotted-path fields into an existing document; returns the result
    async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<Document>;

    /// Apply every op or none
    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Atomic add to one field of an existing document
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        path: &str,
        delta: Delta,
    ) -> StoreResult<()> {
        self.batch_write(vec![WriteOp::Increment {
            collection: collection.to_string(),
            id: id.to_string(),
            increments: vec![(path.to_string(), delta)],
        }])
        .await
    }

    /// Merge-upsert increment of a single document
    async fn upsert_increment(
        &self,
        collection: &str,
        id: &str,
        seed: Document,
        increments: Vec<(String, Delta)>,
    ) -> StoreResult<()> {
        self.batch_write(vec![WriteOp::UpsertIncrement {
            collection: collection.to_string(),
            id: id.to_string(),
            seed,
            increments,
        }])
        .await
    }
}

/// Read a dotted path (`jobs.total`) from a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Numeric field as f64; absent or non-numeric reads as zero
pub fn get_f64(doc: &Document, path: &str) -> f64 {
    get_path(doc, path).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Money field as a decimal; absent or non-numeric reads as zero
pub fn get_decimal(doc: &Document, path: &str) -> Decimal {
    get_path(doc, path)
        .and_then(value_to_decimal)
        .unwrap_or(Decimal::ZERO)
}

/// Write a dotted path, creating intermediate objects
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> StoreResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some((last, parents)) if !last.is_empty() => (*last, parents),
        _ => {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "empty path".into(),
            })
        }
    };

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_string(),
            reason: format!("{segment} is not an object"),
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Convert a serializable value into a document
pub fn to_document<T: serde::Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected object, got {other}"
        ))),
    }
}

/// Convert a document into a typed value
pub fn from_document<T: serde::de::DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_set_and_get_nested_path() {
        let mut doc = Document::new();
        set_path(&mut doc, "performance.success_rate", json!(0.5)).unwrap();
        set_path(&mut doc, "performance.jobs_completed", json!(2)).unwrap();

        assert_eq!(get_path(&doc, "performance.success_rate"), Some(&json!(0.5)));
        assert_eq!(get_f64(&doc, "performance.jobs_completed"), 2.0);
        assert_eq!(get_f64(&doc, "performance.missing"), 0.0);
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut doc = json!({"jobs": 3}).as_object().cloned().unwrap();
        assert!(set_path(&mut doc, "jobs.total", json!(1)).is_err());
    }

    #[test]
    fn test_delta_keeps_integers_integral() {
        let v = Delta::Int(2).apply(Some(&json!(3)), "n").unwrap();
        assert_eq!(v, json!(5));
        assert!(v.is_i64());

        let v = Delta::Float(2.5).apply(Some(&json!(1.0)), "n").unwrap();
        assert_eq!(v.as_f64(), Some(3.5));

        let v = Delta::Int(-1).apply(None, "n").unwrap();
        assert_eq!(v, json!(-1));
    }

    #[test]
    fn test_delta_rejects_non_numeric() {
        assert!(Delta::Int(1).apply(Some(&json!("x")), "n").is_err());
        assert!(Delta::Decimal(dec!(1)).apply(Some(&json!("x")), "n").is_err());
        assert!(Delta::Decimal(dec!(1)).apply(Some(&json!(true)), "n").is_err());
    }

    #[test]
    fn test_decimal_delta_is_exact() {
        let mut doc = Document::new();
        for amount in [dec!(0.1), dec!(0.2)] {
            let next = Delta::Decimal(amount).apply(get_path(&doc, "billed"), "billed").unwrap();
            set_path(&mut doc, "billed", next).unwrap();
        }
        assert_eq!(get_decimal(&doc, "billed"), dec!(0.3));

        let next = Delta::Decimal(dec!(0.3))
            .negate()
            .apply(get_path(&doc, "billed"), "billed")
            .unwrap();
        assert!(next.is_string());
        set_path(&mut doc, "billed", next).unwrap();
        assert!(get_decimal(&doc, "billed").is_zero());
    }

    #[test]
    fn test_decimal_reads_numbers_by_literal() {
        assert_eq!(value_to_decimal(&json!(0.1)), Some(dec!(0.1)));
        assert_eq!(value_to_decimal(&json!(85)), Some(dec!(85)));
        assert_eq!(value_to_decimal(&json!("19.99")), Some(dec!(19.99)));
        assert_eq!(value_to_decimal(&json!("abc")), None);
        // a float-typed counter can still take a money delta
        let v = Delta::Decimal(dec!(0.5)).apply(Some(&json!(1.0)), "n").unwrap();
        assert_eq!(value_to_decimal(&v), Some(dec!(1.5)));
    }
}
