//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use kenning_core::error::StoreError;
use kenning_core::record::Collection;
use kenning_core::store::{merge_patch, ChangeKind, Query, Store, StoreChange};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

type Documents = HashMap<Collection, Vec<(String, Value)>>;

/// A store that keeps every collection in insertion-ordered Vecs.
/// Useful for testing and runs where persistence isn't needed.
pub struct InMemoryStore {
    collections: Arc<RwLock<Documents>>,
    changes: broadcast::Sender<StoreChange>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    fn notify(&self, collection: Collection, id: &str, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            collection,
            id: id.to_string(),
            kind,
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_fields(query: &Query) -> Result<(), StoreError> {
    match query.fields().find(|f| !Query::is_valid_field(f)) {
        Some(field) => Err(StoreError::QueryFailed(format!("invalid field name '{field}'"))),
        None => Ok(()),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn insert_document(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection).or_default();
            if docs.iter().any(|(doc_id, _)| doc_id == id) {
                return Err(StoreError::Duplicate {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            docs.push((id.to_string(), document));
        }
        self.notify(collection, id, ChangeKind::Created);
        Ok(())
    }

    async fn patch_document(&self, collection: Collection, id: &str, patch: Value) -> Result<bool, StoreError> {
        if !patch.is_object() {
            return Err(StoreError::Storage("patch must be a JSON object".into()));
        }
        let found = {
            let mut collections = self.collections.write().await;
            match collections
                .get_mut(&collection)
                .and_then(|docs| docs.iter_mut().find(|(doc_id, _)| doc_id == id))
            {
                Some((_, doc)) => {
                    merge_patch(doc, &patch);
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(collection, id, ChangeKind::Updated);
        }
        Ok(found)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut collections = self.collections.write().await;
            match collections.get_mut(&collection) {
                Some(docs) => {
                    let len_before = docs.len();
                    docs.retain(|(doc_id, _)| doc_id != id);
                    docs.len() < len_before
                }
                None => false,
            }
        };
        if removed {
            self.notify(collection, id, ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn query_documents(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError> {
        check_fields(query)?;
        let collections = self.collections.read().await;
        Ok(match collections.get(&collection) {
            Some(docs) => query.apply(docs.iter().map(|(_, doc)| doc)),
            None => vec![],
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_core::store::StoreExt;
    use kenning_core::{Claim, ClaimAttributes, ClaimType, ConversationUnit};
    use serde_json::json;

    fn claim(statement: &str) -> Claim {
        let attrs = ClaimAttributes {
            claim_type: ClaimType::Belief,
            ..ClaimAttributes::default()
        };
        Claim::from_attributes(statement, "user", &attrs)
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryStore::new();
        let unit = ConversationUnit::new("s1", "user", "hello there");
        store.create(&unit).await.unwrap();

        let loaded: ConversationUnit = store.get(&unit.id).await.unwrap().unwrap();
        assert_eq!(loaded.raw_text, "hello there");
        assert!(!loaded.processed);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryStore::new();
        let unit = ConversationUnit::new("s1", "user", "hello");
        store.create(&unit).await.unwrap();
        let err = store.create(&unit).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryStore::new();
        let unit = ConversationUnit::new("s1", "user", "hello");
        store.create(&unit).await.unwrap();

        assert!(store.update::<ConversationUnit>(&unit.id, json!({"processed": true})).await.unwrap());
        assert!(!store.update::<ConversationUnit>("missing", json!({"processed": true})).await.unwrap());

        let loaded: ConversationUnit = store.get(&unit.id).await.unwrap().unwrap();
        assert!(loaded.processed);
        assert_eq!(loaded.raw_text, "hello");
    }

    #[tokio::test]
    async fn query_filters_sorts_and_limits() {
        let store = InMemoryStore::new();
        let mut a = claim("first");
        a.salience = 0.2;
        let mut b = claim("second");
        b.salience = 0.9;
        let mut c = claim("third");
        c.salience = 0.5;
        c.subject = "sam".into();
        for c in [&a, &b, &c] {
            store.create(c).await.unwrap();
        }

        let top: Vec<Claim> = store
            .query(Query::new().eq("subject", "user").sort_desc("salience").limit(1))
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].statement, "second");

        assert_eq!(store.count::<Claim>(Query::new()).await.unwrap(), 3);
        assert_eq!(store.count::<Claim>(Query::new().eq("subject", "sam")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_field_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .query::<Claim>(Query::new().eq("bad field", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn delete_and_change_notifications() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        let unit = ConversationUnit::new("s1", "user", "bye");
        store.create(&unit).await.unwrap();
        assert!(store.delete::<ConversationUnit>(&unit.id).await.unwrap());
        assert!(!store.delete::<ConversationUnit>(&unit.id).await.unwrap());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Created);
        assert_eq!(first.collection, Collection::ConversationUnits);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Deleted);
        assert_eq!(second.id, unit.id);
    }
}
