//! Store trait: the typed collection store the core persists into.
//!
//! Backends only deal in JSON documents keyed by `(collection, id)`; the
//! [`StoreExt`] extension trait layers typed `get/create/update/delete/query`
//! on top for any [`Record`]. The core needs nothing beyond equality and null
//! filters, a single sort key, and take-N.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::StoreError;
use crate::record::{Collection, Record};

/// A single filter clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { field: String, value: Value },
    IsNull { field: String },
    NotNull { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Filter, sort, and take-N over one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,

    #[serde(default)]
    pub sort: Option<Sort>,

    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.filters.push(Filter::Eq {
            field: field.to_string(),
            value,
        });
        self
    }

    pub fn is_null(mut self, field: &str) -> Self {
        self.filters.push(Filter::IsNull {
            field: field.to_string(),
        });
        self
    }

    pub fn not_null(mut self, field: &str) -> Self {
        self.filters.push(Filter::NotNull {
            field: field.to_string(),
        });
        self
    }

    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort = Some(Sort {
            field: field.to_string(),
            direction: SortDirection::Asc,
        });
        self
    }

    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort = Some(Sort {
            field: field.to_string(),
            direction: SortDirection::Desc,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Field names every backend accepts: ASCII letters, digits, underscore.
    pub fn is_valid_field(field: &str) -> bool {
        !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// All field names referenced by this query.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.filters
            .iter()
            .map(|f| match f {
                Filter::Eq { field, .. } | Filter::IsNull { field } | Filter::NotNull { field } => field.as_str(),
            })
            .chain(self.sort.iter().map(|s| s.field.as_str()))
    }

    /// Whether a document passes every filter.
    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq { field, value } => {
                let actual = document.get(field).unwrap_or(&Value::Null);
                values_equal(actual, value)
            }
            Filter::IsNull { field } => document.get(field).is_none_or(Value::is_null),
            Filter::NotNull { field } => document.get(field).is_some_and(|v| !v.is_null()),
        })
    }

    /// Evaluate the query in memory. Documents must be given in insertion
    /// order; ties in the sort key keep that order.
    pub fn apply<'a>(&self, documents: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut selected: Vec<&Value> = documents.into_iter().filter(|d| self.matches(d)).collect();

        if let Some(sort) = &self.sort {
            selected.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&sort.field).unwrap_or(&Value::Null),
                    b.get(&sort.field).unwrap_or(&Value::Null),
                );
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        selected.into_iter().take(limit).cloned().collect()
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Total order over JSON scalars: null < bool < number < string < other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Shallow-merge `patch` (an object) into `document`.
pub fn merge_patch(document: &mut Value, patch: &Value) {
    if let (Some(target), Some(fields)) = (document.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Notification published on every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub collection: Collection,
    pub id: String,
    pub kind: ChangeKind,
}

/// The document-level store contract.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
#[async_trait]
pub trait Store: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert a new document. Fails with `Duplicate` if the id exists.
    async fn insert_document(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError>;

    /// Merge a partial object into an existing document. `false` if missing.
    async fn patch_document(&self, collection: Collection, id: &str, patch: Value) -> Result<bool, StoreError>;

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;

    async fn query_documents(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError>;

    async fn count_documents(&self, collection: Collection, query: &Query) -> Result<usize, StoreError> {
        Ok(self.query_documents(collection, query).await?.len())
    }

    /// Receive a notification for every create/update/delete.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

fn decode<T: Record>(document: Value) -> Option<T> {
    match serde_json::from_value::<T>(document) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(collection = %T::COLLECTION, error = %e, "Skipping undecodable record");
            None
        }
    }
}

/// Typed access to any [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError>;

    async fn create<T: Record>(&self, record: &T) -> Result<(), StoreError>;

    async fn update<T: Record>(&self, id: &str, patch: Value) -> Result<bool, StoreError>;

    async fn delete<T: Record>(&self, id: &str) -> Result<bool, StoreError>;

    async fn query<T: Record>(&self, query: Query) -> Result<Vec<T>, StoreError>;

    async fn first<T: Record>(&self, query: Query) -> Result<Option<T>, StoreError>;

    async fn count<T: Record>(&self, query: Query) -> Result<usize, StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> StoreExt for S {
    async fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.get_document(T::COLLECTION, id).await?.and_then(decode::<T>))
    }

    async fn create<T: Record>(&self, record: &T) -> Result<(), StoreError> {
        let document = serde_json::to_value(record).map_err(|e| StoreError::Serialization {
            collection: T::COLLECTION.to_string(),
            reason: e.to_string(),
        })?;
        self.insert_document(T::COLLECTION, record.id(), document).await
    }

    async fn update<T: Record>(&self, id: &str, patch: Value) -> Result<bool, StoreError> {
        self.patch_document(T::COLLECTION, id, patch).await
    }

    async fn delete<T: Record>(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_document(T::COLLECTION, id).await
    }

    async fn query<T: Record>(&self, query: Query) -> Result<Vec<T>, StoreError> {
        let documents = self.query_documents(T::COLLECTION, &query).await?;
        Ok(documents.into_iter().filter_map(decode::<T>).collect())
    }

    async fn first<T: Record>(&self, query: Query) -> Result<Option<T>, StoreError> {
        Ok(self.query::<T>(query.limit(1)).await?.into_iter().next())
    }

    async fn count<T: Record>(&self, query: Query) -> Result<usize, StoreError> {
        self.count_documents(T::COLLECTION, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        vec![
            json!({"id": "a", "unit_id": "u1", "score": 3, "resolved": null}),
            json!({"id": "b", "unit_id": "u2", "score": 1, "resolved": "e1"}),
            json!({"id": "c", "unit_id": "u1", "score": 2}),
            json!({"id": "d", "unit_id": "u1", "score": 2.0, "resolved": "e2"}),
        ]
    }

    fn ids(result: &[Value]) -> Vec<&str> {
        result.iter().map(|d| d["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn filters_by_equality_and_null() {
        let docs = docs();
        let q = Query::new().eq("unit_id", "u1").is_null("resolved");
        assert_eq!(ids(&q.apply(&docs)), vec!["a", "c"]);

        let q = Query::new().not_null("resolved");
        assert_eq!(ids(&q.apply(&docs)), vec!["b", "d"]);
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let docs = docs();
        let q = Query::new().eq("score", 2);
        assert_eq!(ids(&q.apply(&docs)), vec!["c", "d"]);
    }

    #[test]
    fn sort_is_stable_and_limited() {
        let docs = docs();
        let q = Query::new().sort_desc("score").limit(3);
        assert_eq!(ids(&q.apply(&docs)), vec!["a", "c", "d"]);

        let q = Query::new().sort_asc("score");
        assert_eq!(ids(&q.apply(&docs)), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn merge_patch_is_shallow() {
        let mut doc = json!({"id": "a", "state": "active", "count": 1});
        merge_patch(&mut doc, &json!({"state": "stale", "extra": true}));
        assert_eq!(doc, json!({"id": "a", "state": "stale", "count": 1, "extra": true}));
    }

    #[test]
    fn field_validation() {
        assert!(Query::is_valid_field("last_referenced"));
        assert!(!Query::is_valid_field("x'); DROP"));
        assert!(!Query::is_valid_field(""));
    }
}
